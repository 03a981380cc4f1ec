//! ParseCode and ResolveDependencies.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use serde_json::{Map, Value, json};

use super::{Params, Tool, ToolContext, ToolError, ToolId, opt_str, require_present, str_param};
use crate::core::index::module_of;
use crate::io::Capabilities;
use crate::io::code_parser::CodeParser;
use crate::io::deps::DependencyResolver;
use crate::io::fs::FileSystem;

/// Extracts imports, usage weights and module from a source file.
pub struct ParseCode {
    fs: Arc<dyn FileSystem>,
    parser: Arc<dyn CodeParser>,
}

impl ParseCode {
    pub fn new(caps: &Capabilities) -> Self {
        Self {
            fs: Arc::clone(&caps.fs),
            parser: Arc::clone(&caps.code_parser),
        }
    }
}

impl Tool for ParseCode {
    fn id(&self) -> ToolId {
        ToolId::ParseCode
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["path"]
    }

    fn run(&self, params: &Params, _ctx: &ToolContext) -> anyhow::Result<Params> {
        let path = str_param(params, "path")?;
        let content = match opt_str(params, "content") {
            Some(content) => content.to_string(),
            None => self.fs.read(path)?,
        };
        let parsed = self
            .parser
            .parse(&content, path)
            .with_context(|| format!("parse {path}"))?;
        let module = parsed.package.clone().unwrap_or_else(|| module_of(path));
        let weights: Map<String, Value> = parsed
            .usage_weights
            .into_iter()
            .map(|(symbol, weight)| (symbol, Value::from(weight)))
            .collect();

        let mut out = Params::new();
        out.insert("content".to_string(), Value::String(content));
        out.insert("module".to_string(), Value::String(module));
        out.insert("imports".to_string(), json!(parsed.imports));
        out.insert("usage_weights".to_string(), Value::Object(weights));
        Ok(out)
    }
}

/// Ranks imported symbols and looks up the files backing them.
pub struct ResolveDependencies {
    resolver: Arc<dyn DependencyResolver>,
}

impl ResolveDependencies {
    pub fn new(caps: &Capabilities) -> Self {
        Self {
            resolver: Arc::clone(&caps.deps),
        }
    }
}

impl Tool for ResolveDependencies {
    fn id(&self) -> ToolId {
        ToolId::ResolveDependencies
    }

    fn validate(&self, params: &Params) -> Result<(), ToolError> {
        let tool = self.id();
        require_present(tool, &["symbols"], params)?;
        let all_strings = params
            .get("symbols")
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().all(Value::is_string));
        if !all_strings {
            return Err(ToolError::InvalidParameter {
                tool,
                key: "symbols",
                reason: "expected an array of strings".to_string(),
            });
        }
        match params.get("weights") {
            None | Some(Value::Null | Value::Object(_)) => Ok(()),
            Some(_) => Err(ToolError::InvalidParameter {
                tool,
                key: "weights",
                reason: "expected an object of numbers".to_string(),
            }),
        }
    }

    fn run(&self, params: &Params, _ctx: &ToolContext) -> anyhow::Result<Params> {
        let symbols: Vec<String> = params
            .get("symbols")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let weights: BTreeMap<String, f64> = params
            .get("weights")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_f64().map(|w| (k.clone(), w)))
                    .collect()
            })
            .unwrap_or_default();
        let module = opt_str(params, "module");
        let with_paths = params
            .get("with_paths")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let ranked = self.resolver.resolve(&symbols, &weights, module)?;
        let mut dependencies = Vec::with_capacity(ranked.len());
        for (symbol, score) in ranked {
            let path = if with_paths {
                self.resolver.path_for(&symbol, module)?
            } else {
                None
            };
            dependencies.push(json!({ "symbol": symbol, "score": score, "path": path }));
        }

        let mut out = Params::new();
        out.insert("dependencies".to_string(), Value::Array(dependencies));
        Ok(out)
    }
}
