//! Blueprint loading.
//!
//! A blueprint is one JSON file or a directory of them. Each file holds an
//! optional `blueprint` header, a `variables` table of defaults and a
//! `resources` array. String values may reference variables as
//! `${var.<name>}`; `module` resources pull in another directory with their
//! own module tag.

use crate::config::{read_variables_file, ApplyOptions};
use crate::error::ConfigError;
use crate::registry::Registry;
use crate::CoreError;
use jumppad_schema::kinds::Module;
use jumppad_schema::{
    normalize_reference, validate_cluster_name, validate_resource_name, Resource, ResourceId,
    ResourceSet, SchemaError,
};
use jumppad_store::Blueprint;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Kinds kept for older blueprints; `ingress` replaces them.
const LEGACY_INGRESS: &[&str] = &["k8s_ingress", "nomad_ingress", "container_ingress"];

const MAX_MODULE_DEPTH: usize = 16;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BlueprintFile {
    #[serde(default)]
    blueprint: Option<Blueprint>,
    #[serde(default)]
    variables: BTreeMap<String, Value>,
    #[serde(default)]
    resources: Vec<Value>,
}

/// The result of reading a blueprint.
#[derive(Debug, Clone, Default)]
pub struct LoadedBlueprint {
    pub blueprint: Option<Blueprint>,
    /// Every resource in file order, modules expanded after their files.
    pub resources: ResourceSet,
    /// The variable values the top-level files were rendered with.
    pub variables: BTreeMap<String, Value>,
}

/// Where a set of files is loaded into.
struct Scope<'a> {
    module: Option<String>,
    /// Ids every resource of the scope depends on.
    depends_on: Vec<String>,
    /// Values that win over file defaults.
    overrides: &'a BTreeMap<String, Value>,
    depth: usize,
}

/// Read the blueprint at `path` with the variables of `options`.
pub fn load_blueprint(
    path: &Path,
    options: &ApplyOptions,
    registry: &Registry,
) -> Result<LoadedBlueprint, CoreError> {
    let mut overrides = match &options.variables_file {
        Some(file) => read_variables_file(file)?,
        None => BTreeMap::new(),
    };
    overrides.extend(options.variables.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut loaded = LoadedBlueprint::default();
    let scope = Scope {
        module: None,
        depends_on: Vec::new(),
        overrides: &overrides,
        depth: 0,
    };
    load_scope(path, &scope, registry, &mut loaded)?;
    if let Some(blueprint) = &mut loaded.blueprint {
        blueprint.source = path.display().to_string();
    }
    debug!(
        path = %path.display(),
        resources = loaded.resources.len(),
        "loaded blueprint"
    );
    Ok(loaded)
}

fn blueprint_files(path: &Path) -> Result<Vec<PathBuf>, CoreError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(ConfigError::Blueprint(format!("no blueprint found at {}", path.display())).into());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let file = entry?.path();
        if file.is_file() && file.extension().is_some_and(|e| e == "json") {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

fn read_file(path: &Path) -> Result<BlueprintFile, CoreError> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| ConfigError::Blueprint(format!("{}: {e}", path.display())).into())
}

fn load_scope(
    path: &Path,
    scope: &Scope<'_>,
    registry: &Registry,
    loaded: &mut LoadedBlueprint,
) -> Result<(), CoreError> {
    if scope.depth > MAX_MODULE_DEPTH {
        return Err(ConfigError::Blueprint(format!(
            "modules nested deeper than {MAX_MODULE_DEPTH} levels at {}",
            path.display()
        ))
        .into());
    }

    let files = blueprint_files(path)?
        .into_iter()
        .map(|f| read_file(&f).map(|content| (f, content)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut variables = BTreeMap::new();
    for (_, file) in &files {
        variables.extend(file.variables.clone());
        for raw in &file.resources {
            if raw.get("type").and_then(Value::as_str) == Some("variable") {
                if let Some(name) = raw.get("name").and_then(Value::as_str) {
                    let default = raw.get("default").cloned().unwrap_or(Value::Null);
                    variables.insert(name.to_owned(), default);
                }
            }
        }
    }
    variables.extend(scope.overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut modules = Vec::new();
    for (file, content) in files {
        let base = file.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        if scope.depth == 0 && loaded.blueprint.is_none() {
            loaded.blueprint = content.blueprint;
        }
        for raw in content.resources {
            let value = substitute(raw, &variables)?;
            let resource = prepare(value, scope, &base, registry)?;
            if let Some(module) = resource.payload::<Module>() {
                modules.push((resource.clone(), module.clone(), base.clone()));
            }
            loaded.resources.insert(resource).map_err(|e| match e {
                SchemaError::DuplicateId(id) => CoreError::Config(ConfigError::DuplicateId(id)),
                other => other.into(),
            })?;
        }
    }
    if scope.depth == 0 {
        loaded.variables = variables;
    }

    for (resource, module, base) in modules {
        let info = resource.info();
        if module.is_remote() {
            return Err(ConfigError::invalid(
                resource.id(),
                "source",
                format!("remote module source '{}' is not supported", module.source),
            )
            .into());
        }
        let tag = match &scope.module {
            Some(parent) => format!("{parent}.{}", info.name),
            None => info.name.clone(),
        };
        let mut depends_on = scope.depends_on.clone();
        depends_on.extend(
            info.depends_on
                .iter()
                .map(|d| normalize_reference(d, scope.module.as_deref()).to_string()),
        );
        let child = Scope {
            module: Some(tag),
            depends_on,
            overrides: &module.variables,
            depth: scope.depth + 1,
        };
        load_scope(&base.join(&module.source), &child, registry, loaded)?;
    }
    Ok(())
}

/// Fill in the envelope fields a file does not spell out, then decode.
fn prepare(value: Value, scope: &Scope<'_>, base: &Path, registry: &Registry) -> Result<Resource, CoreError> {
    let Value::Object(mut map) = value else {
        return Err(ConfigError::Blueprint("every resource must be an object".to_owned()).into());
    };
    let kind = string_field(&map, "type")?;
    let name = string_field(&map, "name")?;
    let id = ResourceId::for_resource(&kind, scope.module.as_deref(), &name);

    let check = if matches!(kind.as_str(), "k8s_cluster" | "nomad_cluster") {
        validate_cluster_name(&name)
    } else {
        validate_resource_name(&name)
    };
    if let Err(e) = check {
        return Err(ConfigError::invalid(&id, "name", e.to_string()).into());
    }
    if !registry.contains(&kind) {
        return Err(ConfigError::UnknownType {
            id: id.to_string(),
            kind,
        }
        .into());
    }
    if LEGACY_INGRESS.contains(&kind.as_str()) {
        warn!(id = %id, "'{kind}' is deprecated, use 'ingress' instead");
    }

    map.insert("id".to_owned(), Value::String(id.to_string()));
    if let Some(module) = &scope.module {
        map.insert("module".to_owned(), Value::String(module.clone()));
    }
    if !scope.depends_on.is_empty() {
        let mut deps: Vec<Value> = scope.depends_on.iter().cloned().map(Value::String).collect();
        if let Some(Value::Array(own)) = map.remove("depends_on") {
            deps.extend(own);
        }
        map.insert("depends_on".to_owned(), Value::Array(deps));
    }
    resolve_paths(&kind, &mut map, base);

    Resource::decode(Value::Object(map), registry).map_err(|e| match e {
        SchemaError::Decode { source, .. } => ConfigError::invalid(&id, "payload", source.to_string()).into(),
        other => other.into(),
    })
}

fn string_field(map: &Map<String, Value>, field: &str) -> Result<String, CoreError> {
    match map.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err(ConfigError::Blueprint(format!("resource is missing a '{field}' string")).into()),
    }
}

/// Make `./` and `../` paths of file-backed kinds relative to the file that
/// declared them.
fn resolve_paths(kind: &str, map: &mut Map<String, Value>, base: &Path) {
    let fields: &[&str] = match kind {
        "copy" => &["source"],
        "helm" => &["chart"],
        "k8s_config" | "nomad_job" => &["paths"],
        "exec_local" | "exec_remote" => &["working_directory"],
        _ => return,
    };
    let rebase = |v: &mut Value| {
        if let Value::String(s) = v {
            if s.starts_with("./") || s.starts_with("../") {
                *s = base.join(s.as_str()).display().to_string();
            }
        }
    };
    for field in fields {
        match map.get_mut(*field) {
            Some(Value::Array(items)) => items.iter_mut().for_each(rebase),
            Some(v) => rebase(v),
            None => {}
        }
    }
}

const PLACEHOLDER: &str = "${var.";

fn lookup<'v>(name: &str, variables: &'v BTreeMap<String, Value>) -> Result<&'v Value, ConfigError> {
    variables
        .get(name.trim())
        .ok_or_else(|| ConfigError::Blueprint(format!("unknown variable '{}'", name.trim())))
}

/// Replace `${var.x}` placeholders. A string that is exactly one placeholder
/// takes the variable's value with its type.
fn substitute(value: Value, variables: &BTreeMap<String, Value>) -> Result<Value, ConfigError> {
    match value {
        Value::String(s) => interpolate(&s, variables),
        Value::Array(items) => items
            .into_iter()
            .map(|v| substitute(v, variables))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| substitute(v, variables).map(|v| (k, v)))
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other),
    }
}

fn interpolate(s: &str, variables: &BTreeMap<String, Value>) -> Result<Value, ConfigError> {
    if let Some(name) = s.strip_prefix(PLACEHOLDER).and_then(|r| r.strip_suffix('}')) {
        if !name.contains('}') {
            return lookup(name, variables).cloned();
        }
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find(PLACEHOLDER) {
        out.push_str(&rest[..start]);
        let after = &rest[start + PLACEHOLDER.len()..];
        let end = after
            .find('}')
            .ok_or_else(|| ConfigError::Blueprint(format!("unterminated placeholder in '{s}'")))?;
        match lookup(&after[..end], variables)? {
            Value::String(v) => out.push_str(v),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}
