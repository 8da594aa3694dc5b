use crate::error::EngineError;
use crate::tree::Color;

/// Renderer configuration.
///
/// Fixed for the renderer's lifetime; changing the buffering depth means
/// building a new renderer.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Number of frame slots (D). Bounds frames in flight and the deferral
    /// of resource destruction.
    pub buffering_depth: usize,

    /// Recording worker threads. `None` uses the rayon default.
    pub worker_threads: Option<usize>,

    /// Merge consecutive draws sharing pipeline state into one region.
    pub coalesce_draws: bool,

    /// Frames retried after a failed resource allocation. The failure that
    /// follows the last retry is fatal; zero makes the first one fatal.
    pub max_allocation_retries: u32,

    /// Premultiplied color the first batch of every frame clears to.
    pub clear_color: Color,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            buffering_depth: 3,
            worker_threads: None,
            coalesce_draws: true,
            max_allocation_retries: 3,
            clear_color: Color::from_premul(0.08, 0.08, 0.1, 1.0),
        }
    }
}

impl RendererConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.buffering_depth == 0 {
            return Err(EngineError::Config("buffering_depth must be >= 1".to_string()));
        }
        if self.worker_threads == Some(0) {
            return Err(EngineError::Config(
                "worker_threads must be >= 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.buffering_depth = depth;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let c = RendererConfig::default();
        assert_eq!(c.buffering_depth, 3);
        assert!(c.coalesce_draws);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_values() {
        assert!(RendererConfig::default().with_depth(0).validate().is_err());
        assert!(matches!(
            RendererConfig::default().with_threads(0).validate(),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn zero_allocation_retries_is_valid() {
        let mut c = RendererConfig::default();
        c.max_allocation_retries = 0;
        assert!(c.validate().is_ok());
    }
}
