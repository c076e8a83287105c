//! # File-backed Descriptor Source
//!
//! [`FileSource`] builds a navigable descriptor graph from compiled descriptor sets,
//! pre-parsed file descriptor protos, already-resolved file descriptors, or `.proto`
//! sources compiled with `protox`.
//!
//! Construction resolves the whole file graph up front: every declared import must be
//! satisfiable from the submitted files, and submitting two different files under the
//! same name is an error. The source is immutable afterwards.

use super::{DescriptorSource, FileEnumerator, SourceError, SymbolDescriptor, not_found};
use async_trait::async_trait;
use prost::Message;
use prost_reflect::{DescriptorPool, ExtensionDescriptor, FileDescriptor};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{HashMap, HashSet, hash_map::Entry};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// A [`DescriptorSource`] backed by a fixed set of file descriptors.
#[derive(Debug)]
pub struct FileSource {
    pool: DescriptorPool,
    extension_index: OnceLock<HashMap<String, Vec<ExtensionDescriptor>>>,
}

impl FileSource {
    /// Creates a source backed by the named files, whose contents are encoded
    /// `FileDescriptorSet` protos (as emitted by `protoc --descriptor_set_out`
    /// or `tonic-prost-build`).
    pub fn from_proto_set_files(paths: &[impl AsRef<Path>]) -> Result<Self, SourceError> {
        let mut protos = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let bytes = std::fs::read(path).map_err(|source| SourceError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
            let set = FileDescriptorSet::decode(bytes.as_slice()).map_err(|source| {
                SourceError::ParseFile {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            protos.extend(set.file);
        }
        Self::from_file_descriptor_protos(protos)
    }

    /// Creates a source backed by the named `.proto` source files. The given
    /// `import_paths` are used to locate imported files; when empty, import roots
    /// are inferred from the locations of the named files.
    pub fn from_proto_files(
        import_paths: &[PathBuf],
        files: &[impl AsRef<Path>],
    ) -> Result<Self, SourceError> {
        let set = if import_paths.is_empty() {
            let inferred: Vec<PathBuf> = files
                .iter()
                .filter_map(|f| f.as_ref().parent().map(Path::to_path_buf))
                .collect();
            protox::compile(files, &inferred)?
        } else {
            protox::compile(files, import_paths)?
        };
        Self::from_file_descriptor_set(set)
    }

    /// Creates a source backed by the given `FileDescriptorSet`.
    pub fn from_file_descriptor_set(set: FileDescriptorSet) -> Result<Self, SourceError> {
        Self::from_file_descriptor_protos(set.file)
    }

    /// Creates a source backed by an encoded `FileDescriptorSet`, e.g. the constant
    /// emitted by `tonic::include_file_descriptor_set!`.
    pub fn from_encoded_file_descriptor_set(bytes: &[u8]) -> Result<Self, SourceError> {
        let set = FileDescriptorSet::decode(bytes)?;
        Self::from_file_descriptor_set(set)
    }

    /// Creates a source backed by the given file descriptor protos.
    pub fn from_file_descriptor_protos(
        protos: impl IntoIterator<Item = FileDescriptorProto>,
    ) -> Result<Self, SourceError> {
        let mut unresolved = HashMap::new();
        for proto in protos {
            match unresolved.entry(proto.name().to_string()) {
                Entry::Occupied(existing) => {
                    if existing.get() != &proto {
                        return Err(SourceError::DuplicateFile(existing.key().clone()));
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(proto);
                }
            }
        }

        let mut pool = DescriptorPool::new();
        let mut resolved = HashSet::new();
        let mut visiting = HashSet::new();
        let mut names: Vec<String> = unresolved.keys().cloned().collect();
        names.sort();
        for name in names {
            resolve_file(&name, None, &unresolved, &mut pool, &mut resolved, &mut visiting)?;
        }

        Ok(Self {
            pool,
            extension_index: OnceLock::new(),
        })
    }

    /// Creates a source backed by the given resolved file descriptors and their
    /// transitive dependencies.
    pub fn from_files(files: impl IntoIterator<Item = FileDescriptor>) -> Result<Self, SourceError> {
        let mut seen: HashMap<String, FileDescriptorProto> = HashMap::new();
        let mut pending: Vec<FileDescriptor> = files.into_iter().collect();
        while let Some(file) = pending.pop() {
            let proto = file.file_descriptor_proto().clone();
            match seen.get(file.name()) {
                Some(existing) if existing == &proto => continue,
                Some(_) => return Err(SourceError::DuplicateFile(file.name().to_string())),
                None => {}
            }
            pending.extend(file.dependencies());
            seen.insert(file.name().to_string(), proto);
        }
        Self::from_file_descriptor_protos(seen.into_values())
    }

    /// The descriptor pool holding every resolved file.
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    fn extension_index(&self) -> &HashMap<String, Vec<ExtensionDescriptor>> {
        // Built at most once, on first use; scans every file in the pool.
        self.extension_index.get_or_init(|| {
            let mut index: HashMap<String, Vec<ExtensionDescriptor>> = HashMap::new();
            for extension in self.pool.all_extensions() {
                index
                    .entry(extension.containing_message().full_name().to_string())
                    .or_default()
                    .push(extension);
            }
            index
        })
    }
}

/// Depth-first, memoized materialization of `name` and its dependencies into the
/// pool. Fails when a dependency is absent from `unresolved`, including the
/// degenerate case of an import cycle, which can never resolve.
fn resolve_file(
    name: &str,
    importer: Option<&str>,
    unresolved: &HashMap<String, FileDescriptorProto>,
    pool: &mut DescriptorPool,
    resolved: &mut HashSet<String>,
    visiting: &mut HashSet<String>,
) -> Result<(), SourceError> {
    if resolved.contains(name) {
        return Ok(());
    }
    let Some(proto) = unresolved.get(name) else {
        return Err(SourceError::MissingDependency {
            file: importer.unwrap_or(name).to_string(),
            dependency: name.to_string(),
        });
    };
    if !visiting.insert(name.to_string()) {
        // A file on an import cycle can never resolve.
        return Err(SourceError::MissingDependency {
            file: importer.unwrap_or(name).to_string(),
            dependency: name.to_string(),
        });
    }
    for dep in &proto.dependency {
        resolve_file(dep, Some(name), unresolved, pool, resolved, visiting)?;
    }
    pool.add_file_descriptor_proto(proto.clone())?;
    visiting.remove(name);
    resolved.insert(name.to_string());
    Ok(())
}

#[async_trait]
impl DescriptorSource for FileSource {
    async fn list_services(&self) -> Result<Vec<String>, SourceError> {
        Ok(self
            .pool
            .services()
            .map(|svc| svc.full_name().to_string())
            .collect())
    }

    async fn find_symbol(
        &self,
        fully_qualified_name: &str,
    ) -> Result<SymbolDescriptor, SourceError> {
        find_symbol_in_pool(&self.pool, fully_qualified_name)
            .ok_or_else(|| not_found("Symbol", fully_qualified_name))
    }

    async fn all_extensions_for_type(
        &self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        Ok(self
            .extension_index()
            .get(type_name)
            .cloned()
            .unwrap_or_default())
    }

    fn as_file_enumerator(&self) -> Option<&dyn FileEnumerator> {
        Some(self)
    }
}

impl FileEnumerator for FileSource {
    fn all_files(&self) -> Vec<FileDescriptor> {
        self.pool.files().collect()
    }
}

pub(crate) fn find_symbol_in_pool(pool: &DescriptorPool, name: &str) -> Option<SymbolDescriptor> {
    if let Some(descriptor) = pool.get_service_by_name(name) {
        return Some(SymbolDescriptor::Service(descriptor));
    }
    if let Some(descriptor) = pool.get_message_by_name(name) {
        return Some(SymbolDescriptor::Message(descriptor));
    }
    if let Some(descriptor) = pool.get_enum_by_name(name) {
        return Some(SymbolDescriptor::Enum(descriptor));
    }
    if let Some(descriptor) = pool.get_extension_by_name(name) {
        return Some(SymbolDescriptor::Extension(descriptor));
    }
    None
}
