//! Item processors: the last stage an item passes through.
//!
//! Any `Fn(&mut StrictItem) -> Result<(), PipelineError>` is a processor. The two writers in
//! this module cover the common cases of logging items and persisting them as JSON lines.

use crate::error::PipelineError;
use crate::item::StrictItem;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A processing step of the item pipeline.
pub trait ItemProcessor: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Processes a single item. Returning an error stops the processor chain for this item.
    fn process_item(&self, item: &mut StrictItem) -> Result<(), PipelineError>;

    /// Called once when the crawl that owns the pipeline finishes.
    fn close(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}

impl<F> ItemProcessor for F
where
    F: Fn(&mut StrictItem) -> Result<(), PipelineError> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn process_item(&self, item: &mut StrictItem) -> Result<(), PipelineError> {
        self(item)
    }
}

/// Logs every item as JSON at info level.
#[derive(Debug, Default)]
pub struct ConsoleWriter;

impl ConsoleWriter {
    pub fn new() -> Self {
        ConsoleWriter
    }
}

impl ItemProcessor for ConsoleWriter {
    fn name(&self) -> &str {
        "console_writer"
    }

    fn process_item(&self, item: &mut StrictItem) -> Result<(), PipelineError> {
        info!("{}", serde_json::to_string(item)?);
        Ok(())
    }
}

/// Appends every item as one JSON object per line.
pub struct JsonLinesWriter {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesWriter {
    /// Opens `path` for appending, creating it if needed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("JSON lines writer opened {:?}", path);
        Ok(JsonLinesWriter {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ItemProcessor for JsonLinesWriter {
    fn name(&self) -> &str {
        "json_lines_writer"
    }

    fn process_item(&self, item: &mut StrictItem) -> Result<(), PipelineError> {
        let line = serde_json::to_string(item)?;
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn close(&self) -> Result<(), PipelineError> {
        self.writer.lock().flush()?;
        debug!("JSON lines writer flushed {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemSchema;

    #[test]
    fn closures_are_processors() {
        let upper = |item: &mut StrictItem| -> Result<(), PipelineError> {
            let title = item.get_str("title").unwrap_or_default().to_uppercase();
            item.set("title", title)?;
            Ok(())
        };
        let schema = ItemSchema::new("book", ["title"]);
        let mut item = StrictItem::new(&schema).with("title", "dune").unwrap();
        upper.process_item(&mut item).unwrap();
        assert_eq!(item.get_str("title"), Some("DUNE"));
        assert_eq!(ItemProcessor::name(&upper), "closure");
    }

    #[test]
    fn json_lines_writer_appends_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.jsonl");
        let schema = ItemSchema::new("book", ["title"]);

        let writer = JsonLinesWriter::new(&path).unwrap();
        for title in ["Dune", "Emma"] {
            let mut item = StrictItem::new(&schema).with("title", title).unwrap();
            writer.process_item(&mut item).unwrap();
        }
        writer.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["title"], "Emma");
    }
}
