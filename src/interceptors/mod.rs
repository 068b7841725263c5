//! Built-in interceptors
//!
//! Small configurable stages: logging, tagging, byte replacement and dropping.

mod log;
mod rules;

use std::sync::Arc;

use crate::common::Result;
use crate::config::{InterceptorConfig, InterceptorKind};
use crate::core::CoreHelper;
use crate::interceptor::{Interceptor, InterceptorModule};

pub use self::log::LogInterceptor;
pub use rules::{DropInterceptor, ReplaceInterceptor, TagInterceptor};

/// Module creating a built-in interceptor from its configuration
#[derive(Debug, Clone)]
pub struct BuiltinModule {
    config: InterceptorConfig,
}

impl BuiltinModule {
    pub fn new(config: InterceptorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }
}

impl InterceptorModule for BuiltinModule {
    fn code(&self) -> &str {
        &self.config.code
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn create_interceptor(&self, index: usize, _helper: &CoreHelper) -> Result<Arc<dyn Interceptor>> {
        let code: Arc<str> = Arc::from(self.config.code.as_str());
        let interceptor: Arc<dyn Interceptor> = match &self.config.kind {
            InterceptorKind::Log { hex, preview } => Arc::new(LogInterceptor::new(code, index, *hex, *preview)),
            InterceptorKind::Tag { tag, pattern } => Arc::new(TagInterceptor::new(code, tag, pattern)),
            InterceptorKind::Replace { find, replace } => Arc::new(ReplaceInterceptor::new(code, find, replace)),
            InterceptorKind::Drop { tag, pattern } => {
                Arc::new(DropInterceptor::new(code, tag.clone(), pattern.as_deref()))
            }
        };
        Ok(interceptor)
    }
}

/// Modules for an ordered list of interceptor configurations
pub fn modules_from_config(configs: &[InterceptorConfig]) -> Vec<Arc<dyn InterceptorModule>> {
    configs
        .iter()
        .map(|config| Arc::new(BuiltinModule::new(config.clone())) as Arc<dyn InterceptorModule>)
        .collect()
}
