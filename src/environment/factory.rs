//! Build-once, copy-many environment factory.
//!
//! Base installs are cached under `base_envs_dir/<fingerprint>/`. A build is
//! guarded by an advisory lock on `<fingerprint>.lock`, so concurrent callers
//! (threads or processes) with the same parameters build at most once. An
//! install is only reused once its `.tsqa-build.json` marker exists.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};
use walkdir::WalkDir;

use super::fingerprint::{ConfigureFlags, EnvVars, Fingerprint};
use super::Environment;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::settings::Settings;

const MARKER_FILE: &str = ".tsqa-build.json";
const BUILD_LOG: &str = "build.log";

/// Working directory of a build step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDir {
    Source,
    Build,
}

/// One build command. Arguments may contain `{source}`, `{prefix}`,
/// `{build}` and `{jobs}`; an argument that is exactly `{configure_args}`
/// expands to the configure flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: StepDir,
    /// Skip the step when this path (placeholders allowed) exists.
    pub skip_if_exists: Option<String>,
}

impl BuildStep {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: StepDir::Build,
            skip_if_exists: None,
        }
    }

    pub fn in_source(mut self) -> Self {
        self.cwd = StepDir::Source;
        self
    }

    pub fn skip_if_exists(mut self, path: &str) -> Self {
        self.skip_if_exists = Some(path.to_string());
        self
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Ordered build-and-install commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecipe {
    pub steps: Vec<BuildStep>,
    pub jobs: usize,
}

impl BuildRecipe {
    pub fn new(steps: Vec<BuildStep>) -> Self {
        Self {
            steps,
            jobs: default_jobs(),
        }
    }

    /// autoreconf (if needed), out-of-tree configure, make, make install.
    pub fn autotools() -> Self {
        Self::new(vec![
            BuildStep::new("autoreconf", ["-if"])
                .in_source()
                .skip_if_exists("{source}/configure"),
            BuildStep::new(
                "{source}/configure",
                ["--prefix={prefix}", "{configure_args}"],
            ),
            BuildStep::new("make", ["-j{jobs}"]),
            BuildStep::new("make", ["install"]),
        ])
    }
}

impl Default for BuildRecipe {
    fn default() -> Self {
        Self::autotools()
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Metadata written next to a completed base install.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BuildInfo {
    pub fingerprint: String,
    pub configure: ConfigureFlags,
    pub env: EnvVars,
    pub built_at: String,
}

struct StepContext<'a> {
    source: &'a Path,
    prefix: &'a Path,
    build: &'a Path,
    flags: &'a ConfigureFlags,
    jobs: usize,
}

impl StepContext<'_> {
    fn expand(&self, s: &str) -> String {
        s.replace("{source}", &self.source.to_string_lossy())
            .replace("{prefix}", &self.prefix.to_string_lossy())
            .replace("{build}", &self.build.to_string_lossy())
            .replace("{jobs}", &self.jobs.to_string())
    }

    fn expand_args(&self, args: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        for arg in args {
            if arg == "{configure_args}" {
                out.extend(self.flags.to_args());
            } else {
                out.push(self.expand(arg));
            }
        }
        out
    }
}

/// Builds (or reuses) base installs and hands out private copies.
#[derive(Debug, Clone)]
pub struct EnvironmentFactory {
    source_dir: PathBuf,
    base_envs_dir: PathBuf,
    work_root: PathBuf,
    recipe: BuildRecipe,
}

impl EnvironmentFactory {
    /// Copies go to `base_envs_dir/../envs` unless changed with
    /// [`EnvironmentFactory::with_work_root`].
    pub fn new(source_dir: impl Into<PathBuf>, base_envs_dir: impl Into<PathBuf>) -> Self {
        let base_envs_dir = base_envs_dir.into();
        let work_root = base_envs_dir
            .parent()
            .map(|p| p.join("envs"))
            .unwrap_or_else(|| std::env::temp_dir().join("tsqa-envs"));
        Self {
            source_dir: source_dir.into(),
            base_envs_dir,
            work_root,
            recipe: BuildRecipe::default(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut recipe = BuildRecipe::default();
        if let Some(jobs) = settings.jobs {
            recipe.jobs = jobs;
        }
        Self::new(&settings.source_dir, &settings.base_envs_dir)
            .with_work_root(&settings.work_root)
            .with_recipe(recipe)
    }

    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }

    pub fn with_recipe(mut self, recipe: BuildRecipe) -> Self {
        self.recipe = recipe;
        self
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn base_envs_dir(&self) -> &Path {
        &self.base_envs_dir
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Install prefix of the cached base build for `fingerprint`.
    pub fn base_prefix(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.base_envs_dir.join(fingerprint.as_str())
    }

    fn marker_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.base_prefix(fingerprint).join(MARKER_FILE)
    }

    fn build_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.base_envs_dir.join(format!("{fingerprint}.build"))
    }

    fn lock_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.base_envs_dir.join(format!("{fingerprint}.lock"))
    }

    /// Whether a completed base build exists for these parameters.
    pub fn is_cached(&self, flags: &ConfigureFlags, env: &EnvVars) -> bool {
        self.marker_path(&Fingerprint::compute(flags, env)).is_file()
    }

    /// Read the metadata of a cached base build.
    pub fn build_info(&self, fingerprint: &Fingerprint) -> Result<BuildInfo> {
        let path = self.marker_path(fingerprint);
        let s = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&s).map_err(|e| Error::parse(&path, e.line(), e.to_string()))
    }

    /// Return a fresh environment built with `flags` and `env`, building the
    /// base install first if it is not cached.
    pub fn get_environment(&self, flags: &ConfigureFlags, env: &EnvVars) -> Result<Environment> {
        let fingerprint = Fingerprint::compute(flags, env);
        let base = self.ensure_base(&fingerprint, flags, env)?;
        let prefix = self.copy_base(&fingerprint, &base)?;
        info!(%fingerprint, prefix = %prefix.display(), "environment ready");
        Ok(
            Environment::new(Layout::new(prefix), flags.clone(), env.clone())
                .with_fingerprint(fingerprint),
        )
    }

    fn acquire_lock(&self, fingerprint: &Fingerprint) -> Result<fs::File> {
        let path = self.lock_path(fingerprint);
        let file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        fs2::FileExt::lock_exclusive(&file)?;
        Ok(file)
    }

    fn ensure_base(
        &self,
        fingerprint: &Fingerprint,
        flags: &ConfigureFlags,
        env: &EnvVars,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_envs_dir)?;
        let prefix = self.base_prefix(fingerprint);
        let _lock = self.acquire_lock(fingerprint)?;

        if self.marker_path(fingerprint).is_file() {
            debug!(%fingerprint, "reusing cached base build");
            return Ok(prefix);
        }

        // Anything here without a marker is a leftover from a failed build.
        if prefix.exists() {
            fs::remove_dir_all(&prefix)?;
        }
        let build_dir = self.build_dir(fingerprint);
        if build_dir.exists() {
            fs::remove_dir_all(&build_dir)?;
        }
        fs::create_dir_all(&build_dir)?;
        fs::create_dir_all(&prefix)?;

        info!(
            %fingerprint,
            source = %self.source_dir.display(),
            flags = ?flags.to_args(),
            "building base environment"
        );
        let ctx = StepContext {
            source: &self.source_dir,
            prefix: &prefix,
            build: &build_dir,
            flags,
            jobs: self.recipe.jobs,
        };
        let mut log = String::new();
        let result = self
            .recipe
            .steps
            .iter()
            .try_for_each(|step| run_step(step, &ctx, env, &mut log));
        fs::write(build_dir.join(BUILD_LOG), &log)?;
        result?;

        let info = BuildInfo {
            fingerprint: fingerprint.to_string(),
            configure: flags.clone(),
            env: env.clone(),
            built_at: chrono::Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_string_pretty(&info)
            .map_err(|e| Error::InvalidState(format!("serialize build info: {e}")))?;
        fs::write(self.marker_path(fingerprint), json)?;
        info!(%fingerprint, "base environment built");
        Ok(prefix)
    }

    fn copy_base(&self, fingerprint: &Fingerprint, base: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.work_root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("env-{fingerprint}-"))
            .tempdir_in(&self.work_root)?
            .keep();
        copy_tree(base, &dir)?;
        debug!(from = %base.display(), to = %dir.display(), "copied base environment");
        Ok(dir)
    }
}

fn run_step(step: &BuildStep, ctx: &StepContext<'_>, env: &EnvVars, log: &mut String) -> Result<()> {
    if let Some(path) = &step.skip_if_exists {
        let path = ctx.expand(path);
        if Path::new(&path).exists() {
            debug!(step = %step.display(), %path, "skipping build step");
            return Ok(());
        }
    }
    let program = ctx.expand(&step.program);
    let args = ctx.expand_args(&step.args);
    let cwd = match step.cwd {
        StepDir::Source => ctx.source,
        StepDir::Build => ctx.build,
    };
    let shown = format!("{program} {}", args.join(" "));
    log.push_str(&format!("$ {shown}\n"));
    debug!(step = %shown, cwd = %cwd.display(), "running build step");

    let mut cmd = Command::new(&program);
    cmd.args(&args).current_dir(cwd);
    for (k, v) in env.iter() {
        cmd.env(k, v);
    }
    let output = match cmd.output() {
        Ok(o) => o,
        Err(e) => {
            return Err(Error::Build {
                step: shown,
                status: format!("failed to spawn: {e}"),
                output: log.clone(),
            })
        }
    };
    log.push_str(&String::from_utf8_lossy(&output.stdout));
    log.push_str(&String::from_utf8_lossy(&output.stderr));
    if !output.status.success() {
        return Err(Error::Build {
            step: shown,
            status: output.status.to_string(),
            output: log.clone(),
        });
    }
    Ok(())
}

/// Recursively copy `src` into the existing directory `dst`, keeping
/// symlinks as symlinks.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            fs::create_dir_all(&target)?;
        } else if ft.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src)?;
    std::os::unix::fs::symlink(link, dst)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)?;
    Ok(())
}
