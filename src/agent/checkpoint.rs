use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    constants::files::{
        CHART_DIR, CHECKPOINT_DIR, CHECKPOINT_EXTENSION, CHECKPOINT_META_EXTENSION,
        RETURNS_TABLE_NAME,
    },
    error::Result,
};

type Recorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Sidecar written next to every module record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub name: String,
    pub episode: usize,
    pub saved_at: DateTime<Utc>,
}

/// Writes module records named `{name}_{episode}.mpk` into one directory, each
/// with a postcard-encoded `{name}_{episode}.meta`
#[derive(Debug, Clone)]
pub struct Checkpointer {
    dir: PathBuf,
}

impl Checkpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str, episode: usize) -> PathBuf {
        self.dir
            .join(format!("{name}_{episode}.{CHECKPOINT_EXTENSION}"))
    }

    pub fn meta_path_for(&self, name: &str, episode: usize) -> PathBuf {
        self.path_for(name, episode)
            .with_extension(CHECKPOINT_META_EXTENSION)
    }

    pub fn save<B: Backend, M: Module<B>>(&self, name: &str, episode: usize, module: &M) -> Result<PathBuf> {
        let path = self.path_for(name, episode);
        module.clone().save_file(path.clone(), &Recorder::default())?;

        let meta = CheckpointMeta {
            name: name.to_string(),
            episode,
            saved_at: Utc::now(),
        };
        fs::write(self.meta_path_for(name, episode), postcard::to_stdvec(&meta)?)?;

        info!(path = %path.display(), "saved checkpoint");
        Ok(path)
    }

    pub fn load_meta(path: impl AsRef<Path>) -> Result<CheckpointMeta> {
        let bytes = fs::read(path.as_ref().with_extension(CHECKPOINT_META_EXTENSION))?;
        Ok(postcard::from_bytes(&bytes)?)
    }

    /// Loads the record at `path` into `module`, which must have the same layout
    pub fn restore<B: Backend, M: Module<B>>(
        path: impl AsRef<Path>,
        module: M,
        device: &B::Device,
    ) -> Result<(M, CheckpointMeta)> {
        let path = path.as_ref();
        let meta = Self::load_meta(path)?;
        let module = module.load_file(path.to_path_buf(), &Recorder::default(), device)?;
        Ok((module, meta))
    }
}

/// Where a run writes its checkpoints, returns table and charts
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub checkpointer: Checkpointer,
    pub chart_dir: PathBuf,
    pub table_path: PathBuf,
    pub plot: bool,
}

impl RunOutput {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let checkpointer = Checkpointer::new(root.join(CHECKPOINT_DIR))?;
        let chart_dir = root.join(CHART_DIR);
        fs::create_dir_all(&chart_dir)?;

        Ok(Self {
            checkpointer,
            chart_dir,
            table_path: root.join(RETURNS_TABLE_NAME),
            plot: true,
        })
    }

    pub fn without_plots(mut self) -> Self {
        self.plot = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{
        linear::LinearActor,
        nn::parameter_values,
        testing::{TestBackend, TestDevice},
    };

    #[test]
    fn save_then_restore_into_fresh_network() {
        let dir = tempfile::tempdir().unwrap();
        let device = TestDevice::default();
        let checkpointer = Checkpointer::new(dir.path().join("model")).unwrap();
        let trained = LinearActor::<TestBackend>::new(4, 3, &device);
        let fresh = LinearActor::<TestBackend>::new(4, 3, &device);
        assert_ne!(parameter_values(&trained), parameter_values(&fresh));

        let path = checkpointer.save("pathwise_derivative_actor", 2, &trained).unwrap();
        let (restored, meta) = Checkpointer::restore(&path, fresh, &device).unwrap();

        assert!(path.ends_with("pathwise_derivative_actor_2.mpk"));
        assert!(checkpointer.meta_path_for("pathwise_derivative_actor", 2).is_file());
        assert_eq!(meta.episode, 2);
        assert_eq!(meta.name, "pathwise_derivative_actor");
        assert_eq!(parameter_values(&restored), parameter_values(&trained));
    }

    #[test]
    fn restore_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let device = TestDevice::default();
        let fresh = LinearActor::<TestBackend>::new(4, 3, &device);

        assert!(Checkpointer::restore(dir.path().join("nothing.mpk"), fresh, &device).is_err());
    }

    #[test]
    fn run_output_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let output = RunOutput::new(dir.path()).unwrap();

        assert!(output.checkpointer.dir().is_dir());
        assert!(output.chart_dir.is_dir());
        assert!(output.table_path.ends_with(RETURNS_TABLE_NAME));
        assert!(!output.without_plots().plot);
    }
}
