use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{load_config, Config};
use crate::error::{BenchError, Result};
use crate::gpu::{select_device, DeviceSpec};
use crate::metrics::MetricsCollector;
use crate::model::{Backend, CandleBackend};
use crate::registry::Registry;

use super::benchmark::{Benchmark, RunOptions};

/// Builder for constructing a [`Benchmark`]
pub struct BenchmarkBuilder {
    config: Option<Config>,
    config_path: Option<PathBuf>,
    registry: Registry,
    backend: Option<Arc<dyn Backend>>,
    device: DeviceSpec,
    options: RunOptions,
}

impl BenchmarkBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            config_path: None,
            registry: Registry::default(),
            backend: None,
            device: DeviceSpec::default(),
            options: RunOptions::default(),
        }
    }

    /// Use an already validated configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Load and validate the configuration file at `path` during [`BenchmarkBuilder::build`]
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Tasks and templates the configuration may name
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Model backend; defaults to [`CandleBackend`] on the selected device
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_device(mut self, device: DeviceSpec) -> Self {
        self.device = device;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<Benchmark> {
        let config = match (self.config, self.config_path) {
            (Some(config), _) => config,
            (None, Some(path)) => load_config(path, &self.registry)?,
            (None, None) => return Err(BenchError::config("config", "no configuration was provided")),
        };

        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(CandleBackend::new(select_device(self.device)?)),
        };

        Ok(Benchmark {
            config: Arc::new(config),
            registry: self.registry,
            backend,
            options: self.options,
            metrics: Arc::new(MetricsCollector::new()),
        })
    }
}

impl Default for BenchmarkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::benchmark::tests::MockBackend;
    use std::io::Write;

    #[test]
    fn test_builder_requires_config() {
        let result = BenchmarkBuilder::default().build();
        assert!(matches!(result, Err(BenchError::ConfigurationError { .. })));
    }

    #[test]
    fn test_builder_loads_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "experiment: e\ntasks: [{{name: qa}}, {{name: squad_v2}}]\nmodels: [{{model: {{name: m}}}}]\n").unwrap();

        let bench = BenchmarkBuilder::new()
            .with_config_file(file.path())
            .with_device(DeviceSpec::Cpu)
            .build()
            .unwrap();
        assert_eq!(bench.config().experiment, "e");
        assert_eq!(bench.jobs().len(), 2);
        assert!(!bench.options().dry_run);
    }

    #[test]
    fn test_builder_rejects_unknown_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "experiment: e\ntasks: [{{name: boolq}}]\nmodels: []\n").unwrap();

        let result = BenchmarkBuilder::new()
            .with_config_file(file.path())
            .with_backend(Arc::new(MockBackend::default()))
            .build();
        assert!(matches!(result, Err(BenchError::UnknownTask { .. })));
    }

    #[test]
    fn test_builder_missing_file() {
        let result = BenchmarkBuilder::new().with_config_file("/nonexistent/bench.yaml").build();
        assert!(matches!(result, Err(BenchError::ConfigurationError { .. })));
    }
}
