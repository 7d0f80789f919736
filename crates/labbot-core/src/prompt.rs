use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
};

use crate::{errors::Error, Result};

/// Loads prompt templates from `{dir}/{name}.md`, caching them after the first read.
#[derive(Debug)]
pub struct PromptStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl PromptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, name: &str) -> Result<String> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(Error::InvalidInput(format!("invalid prompt name: {name}")));
        }

        if let Ok(cache) = self.cache.read() {
            if let Some(hit) = cache.get(name) {
                return Ok(hit.clone());
            }
        }

        let path = self.dir.join(format!("{name}.md"));
        let text = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("prompt {}", path.display()))
            }
            _ => Error::Io(e),
        })?;

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(name.to_string(), text.clone());
        }
        Ok(text)
    }

    /// Loads a prompt and substitutes `{key}` placeholders.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String> {
        let mut text = self.get(name)?;
        for (key, value) in vars {
            text = text.replace(&format!("{{{key}}}"), value);
        }
        Ok(text)
    }
}
