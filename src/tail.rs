/*!
 * Tail emitter: renders accepted records to an output sink
 *
 * Records arrive from concurrent HTTP handlers. They are handed to a single
 * emitter thread over a channel, which owns the sink and the compiled jq
 * filter, so lines from different deliveries never interleave. A record
 * that is not JSON, or that the filter rejects, is logged and skipped.
 */

use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Sender};
use jaq_interpret::{Ctx, Filter, FilterT, ParseCtx, RcIter, Val};
use serde_json::Value;

use crate::error::{RelayError, Result};

/// Consumer of freshly persisted records
pub trait RecordSink: Send + Sync {
    fn emit_records(&self, records: &[String]) -> Result<()>;
}

/// Compiled jq programs keyed by expression text.
///
/// Owned by the emitter thread; programs are not shared across threads.
#[derive(Default)]
pub struct FilterCache {
    compiled: HashMap<String, Rc<Filter>>,
}

impl FilterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `expr` on first use; later calls reuse the program
    pub fn get_or_compile(&mut self, expr: &str) -> Result<Rc<Filter>> {
        let key = expr.trim();
        if let Some(filter) = self.compiled.get(key) {
            return Ok(Rc::clone(filter));
        }
        let filter = Rc::new(compile_filter(key)?);
        self.compiled.insert(key.to_string(), Rc::clone(&filter));
        Ok(filter)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

fn compile_filter(expr: &str) -> Result<Filter> {
    let mut defs = ParseCtx::new(Vec::new());
    defs.insert_natives(jaq_core::core());
    defs.insert_defs(jaq_std::std());

    let (parsed, errs) = jaq_parse::parse(expr, jaq_parse::main());
    if !errs.is_empty() {
        return Err(RelayError::config(format!(
            "invalid jq expression {:?}: {} parse error(s)",
            expr,
            errs.len()
        )));
    }
    let parsed = parsed
        .ok_or_else(|| RelayError::config(format!("invalid jq expression {:?}", expr)))?;

    let filter = defs.compile(parsed);
    if !defs.errs.is_empty() {
        return Err(RelayError::config(format!(
            "invalid jq expression {:?}: {} undefined reference(s)",
            expr,
            defs.errs.len()
        )));
    }
    Ok(filter)
}

/// Run `filter` over one record.
///
/// Zero results render as `null`, one as itself, several as an array.
pub fn apply_filter(filter: &Filter, input: Value) -> std::result::Result<Value, String> {
    let inputs = RcIter::new(core::iter::empty());
    let mut results = Vec::new();
    for output in filter.run((Ctx::new([], &inputs), Val::from(input))) {
        let value = output.map_err(|e| e.to_string())?;
        results.push(Value::from(value));
    }
    Ok(match results.len() {
        0 => Value::Null,
        1 => results.remove(0),
        _ => Value::Array(results),
    })
}

struct Batch {
    records: Vec<String>,
    done: Sender<()>,
}

pub struct TailEmitter {
    jobs: Option<Sender<Batch>>,
    worker: Option<JoinHandle<()>>,
}

impl TailEmitter {
    /// Start an emitter writing to `sink`, optionally through a jq filter.
    ///
    /// An invalid expression is reported here, before any record flows.
    pub fn spawn<W>(sink: W, expr: Option<&str>) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let expr = expr.map(str::trim).filter(|e| !e.is_empty()).map(str::to_string);
        let (jobs_tx, jobs_rx) = unbounded::<Batch>();
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let worker = thread::Builder::new()
            .name("tail-emitter".to_string())
            .spawn(move || {
                let mut cache = FilterCache::new();
                let filter = match expr.as_deref().map(|e| cache.get_or_compile(e)).transpose() {
                    Ok(filter) => {
                        let _ = ready_tx.send(Ok(()));
                        filter
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let mut sink = sink;
                for batch in jobs_rx {
                    for record in &batch.records {
                        if let Some(line) = render_record(record, filter.as_deref()) {
                            if let Err(e) = writeln!(sink, "{}", line) {
                                tracing::warn!(error = %e, "failed to write tailed audit-log record");
                            }
                        }
                    }
                    if let Err(e) = sink.flush() {
                        tracing::warn!(error = %e, "failed to flush tail output");
                    }
                    let _ = batch.done.send(());
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                jobs: Some(jobs_tx),
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(RelayError::Process("tail emitter thread exited during startup".to_string())),
        }
    }

    /// Hand `records` to the emitter thread and wait until they are written
    pub fn emit(&self, records: &[String]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| RelayError::Process("tail emitter is closed".to_string()))?;
        let (done_tx, done_rx) = bounded(1);
        jobs.send(Batch {
            records: records.to_vec(),
            done: done_tx,
        })
        .map_err(|_| RelayError::Process("tail emitter thread stopped".to_string()))?;
        done_rx
            .recv()
            .map_err(|_| RelayError::Process("tail emitter thread stopped".to_string()))
    }
}

impl RecordSink for TailEmitter {
    fn emit_records(&self, records: &[String]) -> Result<()> {
        self.emit(records)
    }
}

impl Drop for TailEmitter {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// One output line for `record`, or None when it must be skipped
fn render_record(record: &str, filter: Option<&Filter>) -> Option<String> {
    let value: Value = match serde_json::from_str(record) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "skipping tailed record that is not valid JSON");
            return None;
        }
    };
    let output = match filter {
        Some(filter) => match apply_filter(filter, value) {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "jq filter failed for tailed record");
                return None;
            }
        },
        None => value,
    };
    match serde_json::to_string(&output) {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode tailed record");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    fn records(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_emit_without_filter_reencodes_json() {
        let buf = SharedBuf::default();
        let emitter = TailEmitter::spawn(buf.clone(), None).unwrap();
        emitter
            .emit(&records(&["{ \"id\" : \"evt-1\" }", "not json", "[1, 2]"]))
            .unwrap();
        assert_eq!(buf.lines(), vec!["{\"id\":\"evt-1\"}", "[1,2]"]);
    }

    #[test]
    fn test_filter_result_arity() {
        let buf = SharedBuf::default();
        let emitter = TailEmitter::spawn(buf.clone(), Some(".tags[]?")).unwrap();
        emitter
            .emit(&records(&[
                r#"{"tags":[]}"#,
                r#"{"tags":["a"]}"#,
                r#"{"tags":["a","b"]}"#,
            ]))
            .unwrap();
        assert_eq!(buf.lines(), vec!["null", "\"a\"", "[\"a\",\"b\"]"]);
    }

    #[test]
    fn test_filter_error_skips_record() {
        let buf = SharedBuf::default();
        let emitter = TailEmitter::spawn(buf.clone(), Some(".id | ascii_downcase")).unwrap();
        emitter
            .emit(&records(&[r#"{"id":42}"#, r#"{"id":"EVT-2"}"#]))
            .unwrap();
        assert_eq!(buf.lines(), vec!["\"evt-2\""]);
    }

    #[test]
    fn test_invalid_expression_fails_at_spawn() {
        let err = TailEmitter::spawn(SharedBuf::default(), Some(".foo | ][")).err().unwrap();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_filter_cache_compiles_once() {
        let mut cache = FilterCache::new();
        let first = cache.get_or_compile(".id").unwrap();
        let second = cache.get_or_compile("  .id ").unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        cache.get_or_compile(".name").unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_apply_filter_direct() {
        let mut cache = FilterCache::new();
        let filter = cache.get_or_compile("{id: .id}").unwrap();
        let out = apply_filter(&filter, json!({"id": "x", "other": 1})).unwrap();
        assert_eq!(out, json!({"id": "x"}));
    }

    #[test]
    fn test_concurrent_emitters_keep_lines_whole() {
        let buf = SharedBuf::default();
        let emitter = Arc::new(TailEmitter::spawn(buf.clone(), None).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let emitter = Arc::clone(&emitter);
                thread::spawn(move || {
                    for n in 0..20 {
                        let record = format!("{{\"w\":{},\"n\":{}}}", worker, n);
                        emitter.emit(&[record]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let lines = buf.lines();
        assert_eq!(lines.len(), 80);
        for line in lines {
            serde_json::from_str::<Value>(&line).unwrap();
        }
    }
}
