use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{EngineConfig, TraceFormat};
use crate::vm::bytecode::{Assembler, BytecodeError};
use crate::vm::{Device, IoDevice, NullDevice};

pub const MANIFEST_FILE: &str = "von.toml";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to parse von.toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize von.toml: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid port '{0}' in [devices]")]
    InvalidPort(String),
    #[error("von.toml already exists in {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}

impl ManifestError {
    /// True when the manifest file simply does not exist.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            ManifestError::Read { source, .. } if source.kind() == io::ErrorKind::NotFound
        )
    }
}

/// Project manifest (von.toml)
#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub program: ProgramInfo,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default = "default_devices")]
    pub devices: BTreeMap<String, DeviceSpec>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgramInfo {
    pub name: String,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default)]
    pub entry: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RuntimeSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stack_depth: Option<usize>,
    #[serde(default)]
    pub trace: TraceFormat,
}

/// What a port is wired to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceSpec {
    Stream(StdStream),
    File {
        file: PathBuf,
        #[serde(default)]
        append: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
    Null,
}

fn default_image() -> String {
    "program.bin".to_string()
}

/// Port 0 reads stdin, 1 writes stdout, 2 writes stderr.
pub fn default_devices() -> BTreeMap<String, DeviceSpec> {
    BTreeMap::from([
        ("0".to_string(), DeviceSpec::Stream(StdStream::Stdin)),
        ("1".to_string(), DeviceSpec::Stream(StdStream::Stdout)),
        ("2".to_string(), DeviceSpec::Stream(StdStream::Stderr)),
    ])
}

impl DeviceSpec {
    /// Open the device; relative file paths resolve against `base`.
    pub fn open(&self, base: &Path) -> Result<Box<dyn Device>, ManifestError> {
        let device: Box<dyn Device> = match self {
            DeviceSpec::Stream(StdStream::Stdin) => Box::new(IoDevice::input(io::stdin())),
            DeviceSpec::Stream(StdStream::Stdout) => Box::new(IoDevice::output(io::stdout())),
            DeviceSpec::Stream(StdStream::Stderr) => Box::new(IoDevice::output(io::stderr())),
            DeviceSpec::Stream(StdStream::Null) => Box::new(NullDevice),
            DeviceSpec::File { file, append } => {
                let path = base.join(file);
                let handle = fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .append(*append)
                    .truncate(!*append)
                    .open(&path)
                    .map_err(|source| ManifestError::Read {
                        path: path.clone(),
                        source,
                    })?;
                let reader = handle.try_clone().map_err(|source| ManifestError::Read {
                    path: path.clone(),
                    source,
                })?;
                Box::new(IoDevice::new(reader, handle))
            }
        };
        Ok(device)
    }
}

impl Manifest {
    /// Create a new manifest with default values
    pub fn new(name: &str) -> Self {
        Self {
            program: ProgramInfo {
                name: name.to_string(),
                image: default_image(),
                entry: 0,
            },
            runtime: RuntimeSection::default(),
            devices: default_devices(),
        }
    }

    /// Load manifest from a directory
    pub fn load(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        let content =
            fs::read_to_string(&path).map_err(|source| ManifestError::Read { path, source })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save manifest to a directory
    pub fn save(&self, dir: &Path) -> Result<(), ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content).map_err(|source| ManifestError::Write { path, source })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_stack_depth: self.runtime.max_stack_depth,
        }
    }

    /// Port bindings, in port order.
    pub fn ports(&self) -> Result<Vec<(u16, &DeviceSpec)>, ManifestError> {
        let mut ports = self
            .devices
            .iter()
            .map(|(key, spec)| {
                key.parse::<u16>()
                    .map(|port| (port, spec))
                    .map_err(|_| ManifestError::InvalidPort(key.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        ports.sort_by_key(|(port, _)| *port);
        Ok(ports)
    }
}

/// Image written by `von init`: prints a greeting on port 1.
pub fn hello_world_image() -> Result<Vec<u8>, BytecodeError> {
    let mut asm = Assembler::new();
    asm.push_bytes(b"Hello, world!\n").write(1).halt();
    asm.finish()
}

/// Initialize a new von project
pub fn init_project(dir: &Path, name: Option<&str>) -> Result<(), ManifestError> {
    let project_name = name
        .map(|s| s.to_string())
        .or_else(|| dir.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "program".to_string());

    if dir.join(MANIFEST_FILE).exists() {
        return Err(ManifestError::AlreadyExists(dir.to_path_buf()));
    }

    let manifest = Manifest::new(&project_name);
    manifest.save(dir)?;

    let image = dir.join(&manifest.program.image);
    if !image.exists() {
        fs::write(&image, hello_world_image()?)
            .map_err(|source| ManifestError::Write { path: image, source })?;
    }

    println!(
        "Created new von project '{}' in {}",
        project_name,
        dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_manifest() {
        let manifest = Manifest::new("demo");
        assert_eq!(manifest.program.name, "demo");
        assert_eq!(manifest.program.image, "program.bin");
        assert_eq!(manifest.program.entry, 0);
        assert_eq!(manifest.ports().unwrap().len(), 3);
    }

    #[test]
    fn test_manifest_serialization() {
        let manifest = Manifest::new("demo");
        let toml_str = toml::to_string_pretty(&manifest).unwrap();
        assert!(toml_str.contains("name = \"demo\""));
        assert!(toml_str.contains("image = \"program.bin\""));
    }

    #[test]
    fn test_parse_devices() {
        let manifest: Manifest = toml::from_str(
            r#"
[program]
name = "io"
entry = 12

[runtime]
max_stack_depth = 1024
trace = "human"

[devices]
1 = "stdout"
7 = "null"
3 = { file = "log.txt", append = true }
"#,
        )
        .unwrap();
        assert_eq!(manifest.program.entry, 12);
        assert_eq!(manifest.engine_config().max_stack_depth, Some(1024));
        assert_eq!(manifest.runtime.trace, TraceFormat::Human);
        let ports = manifest.ports().unwrap();
        assert_eq!(ports[0], (1, &DeviceSpec::Stream(StdStream::Stdout)));
        assert_eq!(
            ports[1],
            (
                3,
                &DeviceSpec::File {
                    file: PathBuf::from("log.txt"),
                    append: true
                }
            )
        );
        assert_eq!(ports[2], (7, &DeviceSpec::Stream(StdStream::Null)));
    }

    #[test]
    fn test_missing_devices_use_defaults() {
        let manifest: Manifest = toml::from_str("[program]\nname = \"x\"\n").unwrap();
        assert_eq!(manifest.devices, default_devices());
        assert_eq!(manifest.runtime.trace, TraceFormat::Off);
    }

    #[test]
    fn test_missing_vs_malformed_manifest() {
        let temp = tempfile::tempdir().unwrap();
        assert!(Manifest::load(temp.path()).unwrap_err().is_missing());

        fs::write(temp.path().join(MANIFEST_FILE), "[program\nname = ").unwrap();
        let err = Manifest::load(temp.path()).unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
        assert!(!err.is_missing());
    }

    #[test]
    fn test_invalid_port() {
        let manifest: Manifest =
            toml::from_str("[program]\nname = \"x\"\n[devices]\nconsole = \"stdout\"\n").unwrap();
        assert!(matches!(
            manifest.ports(),
            Err(ManifestError::InvalidPort(p)) if p == "console"
        ));
    }

    #[test]
    fn test_file_device_writes_relative_to_base() {
        let temp = tempfile::tempdir().unwrap();
        let spec = DeviceSpec::File {
            file: PathBuf::from("out.txt"),
            append: false,
        };
        let mut device = spec.open(temp.path()).unwrap();
        assert_eq!(device.write(b"abc").unwrap(), 3);
        drop(device);
        assert_eq!(fs::read(temp.path().join("out.txt")).unwrap(), b"abc");
    }

    #[test]
    fn test_file_device_replaces_previous_contents() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("out.log");
        fs::write(&path, "previous long contents").unwrap();

        let spec = DeviceSpec::File {
            file: PathBuf::from("out.log"),
            append: false,
        };
        spec.open(temp.path()).unwrap().write(b"new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn test_file_device_appends() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("out.log");
        fs::write(&path, "old ").unwrap();

        let spec = DeviceSpec::File {
            file: PathBuf::from("out.log"),
            append: true,
        };
        spec.open(temp.path()).unwrap().write(b"new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "old new");
    }

    #[test]
    fn test_init_project() {
        let temp = tempfile::tempdir().unwrap();

        init_project(temp.path(), Some("mytest")).unwrap();

        assert!(temp.path().join(MANIFEST_FILE).exists());
        assert!(temp.path().join("program.bin").exists());

        let manifest = Manifest::load(temp.path()).unwrap();
        assert_eq!(manifest.program.name, "mytest");

        assert!(matches!(
            init_project(temp.path(), None),
            Err(ManifestError::AlreadyExists(_))
        ));
    }
}
