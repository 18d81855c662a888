use crate::commands::{value_bytes, CommandContext};
use crate::formatter::{format_json, preview, print_info, print_success, print_warning};
use anyhow::{Context, Result};
use pagestore::{Error, IndexQuery};
use serde_json::json;
use std::io::{Read, Write};

const PREVIEW_BYTES: u64 = 48;

pub fn put(ctx: &CommandContext, key: &str, value: Option<&str>, file: Option<&str>, overwrite: bool) -> Result<()> {
    let bytes = value_bytes(value, file)?;
    match ctx.store.put(None, key.as_bytes(), &bytes, overwrite) {
        Ok(address) => {
            print_success(&format!("Stored {} bytes under '{}' at {}", bytes.len(), key, address));
            Ok(())
        }
        Err(Error::KeyExists) => anyhow::bail!("key '{}' already exists", key),
        Err(e) => Err(e.into()),
    }
}

pub fn append(ctx: &CommandContext, key: &str, value: Option<&str>, file: Option<&str>) -> Result<()> {
    let bytes = value_bytes(value, file)?;
    let address = ctx.store.append(None, key.as_bytes(), &bytes)?;
    print_success(&format!("Appended {} bytes to '{}' at {}", bytes.len(), key, address));
    Ok(())
}

pub fn get(ctx: &CommandContext, key: &str, output: Option<&str>) -> Result<()> {
    let value = match ctx.store.get(key.as_bytes())? {
        Some(value) => value,
        None => {
            print_warning(&format!("No value for '{}'", key));
            return Ok(());
        }
    };

    if let Some(path) = output {
        std::fs::write(path, &value).with_context(|| format!("failed to write '{}'", path))?;
        print_success(&format!("Wrote {} bytes to '{}'", value.len(), path));
        return Ok(());
    }

    match std::str::from_utf8(&value) {
        Ok(text) => println!("{}", text),
        Err(_) => {
            std::io::stdout().write_all(&value)?;
        }
    }
    Ok(())
}

pub fn remove(ctx: &CommandContext, key: &str) -> Result<()> {
    match ctx.store.remove(None, key.as_bytes())? {
        Some(value) => print_success(&format!("Removed '{}' ({} bytes)", key, value.len())),
        None => print_warning(&format!("No value for '{}'", key)),
    }
    Ok(())
}

pub fn scan(ctx: &CommandContext, prefix: Option<&str>, limit: Option<usize>) -> Result<()> {
    let query = match prefix {
        Some(prefix) => IndexQuery::Prefix(prefix.as_bytes().to_vec()),
        None => IndexQuery::All,
    };
    let limit = limit.unwrap_or(usize::MAX);

    let mut rows = Vec::new();
    ctx.store.find(&query, None, |key, address| {
        rows.push((key.to_vec(), address));
        Ok(rows.len() < limit)
    })?;

    if rows.is_empty() {
        print_info("No keys found");
        return Ok(());
    }

    let mut listed = Vec::with_capacity(rows.len());
    for (key, address) in rows {
        // only the first bytes are loaded for the preview
        let (size, head) = match ctx.store.get_as_stream_by_address(address)? {
            Some(stream) => {
                let size = stream.len();
                let mut head = Vec::new();
                stream.take(PREVIEW_BYTES).read_to_end(&mut head)?;
                (Some(size), Some(head))
            }
            None => (None, None),
        };
        listed.push(json!({
            "key": String::from_utf8_lossy(&key),
            "address": address.to_string(),
            "size": size,
            "preview": head.as_deref().map(preview),
        }));
    }

    println!("{}", format_json(&json!(listed), &ctx.format)?);
    Ok(())
}
