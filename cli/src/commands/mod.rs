pub mod store;
pub mod value;

use crate::formatter::OutputFormat;
use anyhow::{Context, Result};
use pagestore::{StoreOptions, ValueStore};

pub struct CommandContext {
    pub store: ValueStore,
    pub format: OutputFormat,
}

impl CommandContext {
    pub fn new(path: &str, format_str: &str, page_size: usize, read_only: bool) -> Result<Self> {
        let options = StoreOptions {
            page_size,
            read_only,
            ..StoreOptions::default()
        };
        let store = ValueStore::open_with_options(path, options)
            .with_context(|| format!("failed to open store '{}'", path))?;

        Ok(Self {
            store,
            format: OutputFormat::from_str(format_str),
        })
    }

    pub fn close(&self) -> Result<()> {
        self.store.close()?;
        Ok(())
    }
}

/// Value bytes from `--file`, else the positional text.
pub fn value_bytes(value: Option<&str>, file: Option<&str>) -> Result<Vec<u8>> {
    match (file, value) {
        (Some(path), _) => std::fs::read(path).with_context(|| format!("failed to read '{}'", path)),
        (None, Some(text)) => Ok(text.as_bytes().to_vec()),
        (None, None) => anyhow::bail!("a value or --file is required"),
    }
}
