//! ReadFile / WriteFile: thin adapters over the file-system capability.

use std::sync::Arc;

use serde_json::Value;

use super::{Params, Tool, ToolContext, ToolError, ToolId, require_string, str_param};
use crate::io::Capabilities;
use crate::io::fs::FileSystem;

pub struct ReadFile {
    fs: Arc<dyn FileSystem>,
}

impl ReadFile {
    pub fn new(caps: &Capabilities) -> Self {
        Self {
            fs: Arc::clone(&caps.fs),
        }
    }
}

impl Tool for ReadFile {
    fn id(&self) -> ToolId {
        ToolId::ReadFile
    }

    fn validate(&self, params: &Params) -> Result<(), ToolError> {
        require_string(self.id(), "path", params)
    }

    fn run(&self, params: &Params, _ctx: &ToolContext) -> anyhow::Result<Params> {
        let path = str_param(params, "path")?;
        let content = self.fs.read(path)?;
        let mut out = Params::new();
        out.insert("path".to_string(), Value::String(path.to_string()));
        out.insert("content".to_string(), Value::String(content));
        Ok(out)
    }
}

/// Writes `content` to `path`. An empty string is valid content; an absent
/// or null `content` is rejected before the tool runs.
pub struct WriteFile {
    fs: Arc<dyn FileSystem>,
}

impl WriteFile {
    pub fn new(caps: &Capabilities) -> Self {
        Self {
            fs: Arc::clone(&caps.fs),
        }
    }
}

impl Tool for WriteFile {
    fn id(&self) -> ToolId {
        ToolId::WriteFile
    }

    fn validate(&self, params: &Params) -> Result<(), ToolError> {
        require_string(self.id(), "path", params)?;
        require_string(self.id(), "content", params)
    }

    fn run(&self, params: &Params, _ctx: &ToolContext) -> anyhow::Result<Params> {
        let path = str_param(params, "path")?;
        let content = str_param(params, "content")?;
        self.fs.write(path, content)?;
        let mut out = Params::new();
        out.insert("path".to_string(), Value::String(path.to_string()));
        out.insert("bytes".to_string(), Value::from(content.len()));
        Ok(out)
    }
}
