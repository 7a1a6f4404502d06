//! JPEG to HEIC conversion.
//!
//! - [`PathResolver`] picks a collision-free target in the sibling output directory
//! - [`metadata`] extracts, embeds and verifies EXIF
//! - [`Converter`] runs one file through decode, encode, atomic write and verification
//! - [`ConversionPipeline`] ties them together as the queue's [`JobRunner`]

mod converter;
mod encoder;
pub mod metadata;
mod paths;

pub use converter::{
    ConversionOutcome, Converter, ConverterSettings, Stage, NOTE_DISABLED,
    NOTE_NO_SOURCE_TIMESTAMP, NOTE_NOT_IN_TARGET, NOTE_VERIFIED,
};
pub use encoder::{HeifEncTool, TargetEncoder};
pub use metadata::MetadataRecord;
pub use paths::PathResolver;

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::queue::{JobResult, JobRunner};

/// Resolves the target path and converts, one source at a time.
pub struct ConversionPipeline {
    resolver: PathResolver,
    converter: Converter,
}

impl ConversionPipeline {
    pub fn new(resolver: PathResolver, converter: Converter) -> Self {
        Self { resolver, converter }
    }

    /// Build the pipeline described by `config` around `encoder`.
    pub fn from_config(config: &Config, encoder: Arc<dyn TargetEncoder>) -> Self {
        let resolver = PathResolver::new(
            config.conversion.output_dir_name.clone(),
            encoder.extension(),
        );
        let converter = Converter::new(ConverterSettings::from(&config.conversion), encoder);
        Self::new(resolver, converter)
    }
}

impl JobRunner for ConversionPipeline {
    fn run(&self, source: &Path) -> JobResult {
        match self.resolver.resolve(source) {
            Ok(target) => {
                let outcome = self.converter.convert(source, &target);
                JobResult {
                    target_path: Some(target),
                    outcome,
                }
            }
            Err(e) => {
                tracing::warn!(source = %source.display(), error = %e, "Cannot resolve target path");
                JobResult::failed(e.to_string())
            }
        }
    }
}
