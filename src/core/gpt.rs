use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::chain::CancelToken;
use crate::types::{DetectError, DetectResult};

/// How long to wait between child status polls
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How much captured diagnostic output to carry in an error
const DIAGNOSTICS_TAIL: usize = 4000;

/// Product container format requested from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductFormat {
    BeamDimap,
    GeoTiff,
    Hdf5,
}

impl ProductFormat {
    /// Format identifier as the engine's -f flag expects it
    pub fn flag(&self) -> &'static str {
        match self {
            ProductFormat::BeamDimap => "BEAM-DIMAP",
            ProductFormat::GeoTiff => "GeoTIFF",
            ProductFormat::Hdf5 => "HDF5",
        }
    }

    /// File extension of the primary output artifact
    pub fn extension(&self) -> &'static str {
        match self {
            ProductFormat::BeamDimap => "dim",
            ProductFormat::GeoTiff => "tif",
            ProductFormat::Hdf5 => "h5",
        }
    }
}

/// The raster transforms the pipeline submits to the external engine.
///
/// One closed set of typed parameter variants; a new operation is a new
/// variant, not a new wrapper type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GptOperator {
    ApplyOrbitFile,
    Deburst,
    Calibration {
        output_complex: bool,
    },
    Multilook {
        range_looks: u32,
        azimuth_looks: u32,
    },
    TerrainCorrection {
        map_projection: String,
        pixel_spacing_m: f64,
    },
    Subset {
        geo_region_wkt: String,
        copy_metadata: bool,
    },
    LandSeaMask {
        shoreline_extension: u32,
    },
}

impl GptOperator {
    /// Operator identifier as the engine knows it
    pub fn name(&self) -> &'static str {
        match self {
            GptOperator::ApplyOrbitFile => "Apply-Orbit-File",
            GptOperator::Deburst => "TOPSAR-Deburst",
            GptOperator::Calibration { .. } => "Calibration",
            GptOperator::Multilook { .. } => "Multilook",
            GptOperator::TerrainCorrection { .. } => "Terrain-Correction",
            GptOperator::Subset { .. } => "Subset",
            GptOperator::LandSeaMask { .. } => "Land-Sea-Mask",
        }
    }

    /// Short suffix used when deriving output artifact names
    pub fn suffix(&self) -> &'static str {
        match self {
            GptOperator::ApplyOrbitFile => "Orb",
            GptOperator::Deburst => "Deb",
            GptOperator::Calibration { .. } => "Cal",
            GptOperator::Multilook { .. } => "ML",
            GptOperator::TerrainCorrection { .. } => "TC",
            GptOperator::Subset { .. } => "Sub",
            GptOperator::LandSeaMask { .. } => "Msk",
        }
    }

    /// Key/value parameters passed as -Pkey=value
    pub fn parameters(&self) -> Vec<(String, String)> {
        match self {
            GptOperator::ApplyOrbitFile => vec![],
            GptOperator::Deburst => vec![],
            GptOperator::Calibration { output_complex } => vec![(
                "outputImageInComplex".to_string(),
                output_complex.to_string(),
            )],
            GptOperator::Multilook {
                range_looks,
                azimuth_looks,
            } => vec![
                ("nRgLooks".to_string(), range_looks.to_string()),
                ("nAzLooks".to_string(), azimuth_looks.to_string()),
            ],
            GptOperator::TerrainCorrection {
                map_projection,
                pixel_spacing_m,
            } => vec![
                ("mapProjection".to_string(), map_projection.clone()),
                ("pixelSpacingInMeter".to_string(), pixel_spacing_m.to_string()),
            ],
            GptOperator::Subset {
                geo_region_wkt,
                copy_metadata,
            } => vec![
                ("geoRegion".to_string(), geo_region_wkt.clone()),
                ("copyMetadata".to_string(), copy_metadata.to_string()),
            ],
            GptOperator::LandSeaMask {
                shoreline_extension,
            } => vec![(
                "shorelineExtension".to_string(),
                shoreline_extension.to_string(),
            )],
        }
    }

    /// Human-readable parameter list for error reporting
    pub fn parameters_desc(&self) -> String {
        self.parameters()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Uniform interface to ESA SNAP's graph processing tool.
///
/// Submits one operator at a time as a subprocess, with a bounded execution
/// timeout and diagnostic capture. The input product is never modified.
#[derive(Debug, Clone)]
pub struct GptEngine {
    gpt_path: PathBuf,
    timeout: Duration,
    format: ProductFormat,
}

impl GptEngine {
    /// Engine with an explicit executable path
    pub fn new(gpt_path: impl Into<PathBuf>) -> Self {
        Self {
            gpt_path: gpt_path.into(),
            timeout: Duration::from_secs(1800),
            format: ProductFormat::BeamDimap,
        }
    }

    /// Locate the engine: GPT_PATH environment variable first, then
    /// well-known install locations.
    pub fn discover() -> DetectResult<Self> {
        let candidates = Self::candidate_paths();
        for candidate in &candidates {
            if candidate.exists() {
                log::info!("found gpt executable at {}", candidate.display());
                return Ok(Self::new(candidate));
            }
        }
        Err(DetectError::Precondition(format!(
            "SNAP gpt executable not found; searched {}. Set GPT_PATH or pass an explicit path.",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(env_path) = std::env::var("GPT_PATH") {
            candidates.push(PathBuf::from(env_path));
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join("esa-snap").join("bin").join("gpt"));
            candidates.push(home.join("snap").join("bin").join("gpt"));
        }
        candidates.push(PathBuf::from("/usr/local/esa-snap/bin/gpt"));
        candidates.push(PathBuf::from("/opt/snap/bin/gpt"));
        candidates
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_format(mut self, format: ProductFormat) -> Self {
        self.format = format;
        self
    }

    pub fn gpt_path(&self) -> &Path {
        &self.gpt_path
    }

    pub fn format(&self) -> ProductFormat {
        self.format
    }

    /// Derive an output artifact path for an operator applied to an input,
    /// following the `<stem>_<suffix>.<ext>` naming convention.
    pub fn derived_output(&self, outdir: &Path, input: &Path, operator: &GptOperator) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "product".to_string());
        outdir.join(format!(
            "{}_{}.{}",
            stem,
            operator.suffix(),
            self.format.extension()
        ))
    }

    /// Submit one operator against an input product.
    ///
    /// Writes the result to `output` (overwriting deterministically) and
    /// returns that path. Non-zero exit, timeout, and a missing output
    /// artifact all surface as `ExternalProcessing` errors carrying the
    /// operator name, its parameters, and captured diagnostics.
    pub fn invoke(
        &self,
        operator: &GptOperator,
        input: &Path,
        output: &Path,
    ) -> DetectResult<PathBuf> {
        self.invoke_cancellable(operator, input, output, &CancelToken::new())
    }

    /// Like [`invoke`](Self::invoke), but also terminates the engine process
    /// if the token is cancelled mid-run.
    pub fn invoke_cancellable(
        &self,
        operator: &GptOperator,
        input: &Path,
        output: &Path,
        cancel: &CancelToken,
    ) -> DetectResult<PathBuf> {
        let params_desc = operator.parameters_desc();
        self.overwrite_target(output)?;

        let scratch = tempfile::tempdir()?;
        let stdout_path = scratch.path().join("gpt-stdout.log");
        let stderr_path = scratch.path().join("gpt-stderr.log");

        let mut command = Command::new(&self.gpt_path);
        command
            .arg(operator.name())
            .arg("-t")
            .arg(output)
            .arg("-f")
            .arg(self.format.flag());
        for (key, value) in operator.parameters() {
            command.arg(format!("-P{}={}", key, value));
        }
        command
            .arg(input)
            .stdin(Stdio::null())
            .stdout(File::create(&stdout_path)?)
            .stderr(File::create(&stderr_path)?);

        log::info!(
            "invoking gpt {} on {} -> {}",
            operator.name(),
            input.display(),
            output.display()
        );
        log::debug!("command: {:?}", command);

        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            external_error(
                operator,
                &params_desc,
                format!("failed to spawn '{}': {}", self.gpt_path.display(), e),
            )
        })?;

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if cancel.is_cancelled() {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(external_error(
                            operator,
                            &params_desc,
                            "cancelled while the engine was running".to_string(),
                        ));
                    }
                    if start.elapsed() >= self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(external_error(
                            operator,
                            &params_desc,
                            format!("timed out after {:.0?}", self.timeout),
                        ));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(external_error(
                        operator,
                        &params_desc,
                        format!("failed to poll engine process: {}", e),
                    ));
                }
            }
        };

        if !status.success() {
            let diagnostics = format!(
                "{}\n{}",
                diagnostics_tail(&stderr_path),
                diagnostics_tail(&stdout_path)
            );
            return Err(external_error(
                operator,
                &params_desc,
                format!("exit status {}: {}", status, diagnostics.trim()),
            ));
        }

        if !output.exists() {
            return Err(external_error(
                operator,
                &params_desc,
                format!(
                    "engine exited cleanly but produced no artifact at {}",
                    output.display()
                ),
            ));
        }

        log::info!(
            "gpt {} finished in {:.1}s",
            operator.name(),
            start.elapsed().as_secs_f64()
        );
        Ok(output.to_path_buf())
    }

    /// Deterministic overwrite of a previous output artifact, including the
    /// sidecar data directory a BEAM-DIMAP product carries.
    fn overwrite_target(&self, output: &Path) -> DetectResult<()> {
        if output.exists() {
            log::debug!("overwriting existing artifact {}", output.display());
            std::fs::remove_file(output)?;
        }
        let sidecar = output.with_extension("data");
        if sidecar.is_dir() {
            std::fs::remove_dir_all(&sidecar)?;
        }
        Ok(())
    }
}

fn external_error(operator: &GptOperator, params_desc: &str, message: String) -> DetectError {
    DetectError::ExternalProcessing {
        operation: operator.name().to_string(),
        parameters: params_desc.to_string(),
        message,
    }
}

/// Last part of a captured diagnostic file, empty if unreadable
fn diagnostics_tail(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let trimmed = content.trim();
            if trimmed.len() > DIAGNOSTICS_TAIL {
                let split = trimmed.len() - DIAGNOSTICS_TAIL;
                // Stay on a char boundary
                let split = (split..trimmed.len())
                    .find(|&i| trimmed.is_char_boundary(i))
                    .unwrap_or(trimmed.len());
                format!("...{}", &trimmed[split..])
            } else {
                trimmed.to_string()
            }
        }
        Err(_) => String::new(),
    }
}
