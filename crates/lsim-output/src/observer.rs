//! `LevelObserver<W>` — bridges `EnvObserver` to an `OutputWriter`.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use lsim_core::{EntityId, EventId, SimTime};
use lsim_engine::EnvObserver;
use lsim_model::Entity;

use crate::row::LevelRow;
use crate::writer::OutputWriter;
use crate::{OutputError, OutputResult};

/// An [`EnvObserver`] that writes a row whenever a watched container slot
/// changes level.
///
/// Errors from the writer are stored internally because `EnvObserver`
/// methods have no return value.  After the run, check for errors with
/// [`take_error`][Self::take_error].  A run may be resumed, so the writer is
/// not finished at the end of a run; call [`OutputWriter::finish`] on
/// [`into_writer`][Self::into_writer].
pub struct LevelObserver<W: OutputWriter> {
    writer:     W,
    entities:   Vec<Rc<Entity>>,
    last:       FxHashMap<(EntityId, String), f64>,
    last_error: Option<OutputError>,
}

impl<W: OutputWriter> LevelObserver<W> {
    pub fn new(writer: W, entities: Vec<Rc<Entity>>) -> Self {
        Self { writer, entities, last: FxHashMap::default(), last_error: None }
    }

    /// Take the stored write error (if any) after the run.
    pub fn take_error(&mut self) -> Option<OutputError> {
        self.last_error.take()
    }

    /// Unwrap the inner writer (e.g. to add logbooks after the run).
    pub fn into_writer(self) -> W {
        self.writer
    }

    fn changed_rows(&mut self, now: SimTime) -> Vec<LevelRow> {
        let mut rows = Vec::new();
        for entity in &self.entities {
            let Ok(container) = entity.container() else { continue };
            for (slot, s) in container.snapshot() {
                let key = (entity.id(), slot);
                if self.last.get(&key) == Some(&s.level) {
                    continue;
                }
                rows.push(LevelRow {
                    t:      now,
                    object: entity.name().to_owned(),
                    slot:   key.1.clone(),
                    level:  s.level,
                });
                self.last.insert(key, s.level);
            }
        }
        rows
    }

    fn store_err(&mut self, result: OutputResult<()>) {
        if let Err(e) = result {
            // Keep only the first error.
            if self.last_error.is_none() {
                self.last_error = Some(e);
            }
        }
    }
}

impl<W: OutputWriter> EnvObserver for LevelObserver<W> {
    fn on_step(&mut self, now: SimTime, _event: EventId) {
        let rows = self.changed_rows(now);
        if !rows.is_empty() {
            let result = self.writer.write_level_rows(&rows);
            self.store_err(result);
        }
    }
}
