//! Field specifications and the scheme compiler.
//!
//! A scheme declares, per field, a value shape, a dtype, an optional group
//! (a named multiplicity expanding the per-timestep shape by a leading
//! dimension) and whether the field is constant over an episode. Compiling
//! a scheme validates it against the group sizes and the registered
//! preprocessors and produces the concrete storage layout used by
//! [`EpisodeBatch`].
//!
//! [`EpisodeBatch`]: crate::episode_batch::EpisodeBatch
use crate::error::StoreError;
use crate::transform::Preprocess;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// The filled mask is not a field; schemes may not shadow it.
const RESERVED_FIELD_NAMES: &[&str] = &["filled"];

/// Element type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Dtype {
    /// 32-bit float.
    F32,
    /// 64-bit signed integer.
    I64,
    /// 32-bit signed integer.
    I32,
    /// Unsigned byte.
    U8,
    /// Boolean.
    Bool,
}

/// Declaration of a single field.
///
/// `vshape` excludes batch, time and group dimensions. When `group` is
/// set, the field's effective per-timestep shape becomes
/// `(group_size,) + vshape`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldSpec {
    /// Field name, unique within a scheme.
    pub name: String,
    /// Per-element value shape.
    pub vshape: Vec<usize>,
    /// Group expanding the shape by a leading dimension.
    #[serde(default)]
    pub group: Option<String>,
    /// Element dtype.
    #[serde(default = "default_dtype")]
    pub dtype: Dtype,
    /// Written once per episode instead of once per timestep.
    #[serde(default)]
    pub episode_const: bool,
}

fn default_dtype() -> Dtype {
    Dtype::F32
}

impl FieldSpec {
    /// A float field with the given value shape.
    pub fn new(name: impl Into<String>, vshape: &[usize]) -> Self {
        Self {
            name: name.into(),
            vshape: vshape.to_vec(),
            group: None,
            dtype: Dtype::F32,
            episode_const: false,
        }
    }

    /// Sets the field's group.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Sets the field's dtype.
    pub fn dtype(mut self, dtype: Dtype) -> Self {
        self.dtype = dtype;
        self
    }

    /// Marks the field as constant over an episode.
    pub fn episode_const(mut self) -> Self {
        self.episode_const = true;
        self
    }
}

/// Serializable scheme declaration: fields plus group sizes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchemeConfig {
    /// Declared fields.
    pub fields: Vec<FieldSpec>,
    /// Named group sizes, fixed for the lifetime of a store.
    pub groups: BTreeMap<String, usize>,
}

impl SchemeConfig {
    /// An empty scheme.
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            groups: BTreeMap::new(),
        }
    }

    /// Adds a field.
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Adds a group size.
    pub fn group(mut self, name: impl Into<String>, size: usize) -> Self {
        self.groups.insert(name.into(), size);
        self
    }

    /// Constructs a scheme configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the scheme configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

impl Default for SchemeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage layout of one field after compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledField {
    /// Field name.
    pub name: String,
    /// Effective per-timestep shape, after group expansion.
    pub shape: Vec<usize>,
    /// Element dtype.
    pub dtype: Dtype,
    /// Written once per episode; storage carries no time axis.
    pub episode_const: bool,
}

impl CompiledField {
    /// Whether the field's storage carries a time axis.
    pub fn has_time_axis(&self) -> bool {
        !self.episode_const
    }
}

/// Immutable output of [`compile`]: per-field storage layout, group sizes
/// and the preprocessors whose derived fields it already contains.
pub struct CompiledScheme {
    fields: Vec<CompiledField>,
    index: HashMap<String, usize>,
    groups: BTreeMap<String, usize>,
    preprocess: Vec<Preprocess>,
}

impl CompiledScheme {
    /// Compiled fields, raw then derived, in declaration order.
    pub fn fields(&self) -> &[CompiledField] {
        &self.fields
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&CompiledField> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// Group sizes the scheme was compiled against.
    pub fn groups(&self) -> &BTreeMap<String, usize> {
        &self.groups
    }

    /// Preprocessors keyed on the given source field.
    pub(crate) fn preprocessors_for<'a>(
        &'a self,
        source: &'a str,
    ) -> impl Iterator<Item = &'a Preprocess> {
        self.preprocess.iter().filter(move |p| p.source == source)
    }

    /// Whether two compiled schemes lay out storage identically.
    pub fn same_layout(&self, other: &CompiledScheme) -> bool {
        self.fields == other.fields && self.groups == other.groups
    }
}

fn effective_shape(vshape: &[usize], group: Option<&str>, groups: &BTreeMap<String, usize>) -> Vec<usize> {
    match group {
        Some(g) => {
            let mut shape = Vec::with_capacity(vshape.len() + 1);
            shape.push(groups[g]);
            shape.extend_from_slice(vshape);
            shape
        }
        None => vshape.to_vec(),
    }
}

/// Compiles field specifications, group sizes and preprocessors into the
/// concrete storage layout. Pure function; no side effects.
///
/// Fails with [`StoreError::Scheme`] on duplicate or reserved field
/// names, an empty value shape, an undeclared group reference, a
/// preprocessor naming an unknown source field, or a derived-field name
/// colliding with an existing field.
pub fn compile(
    fields: &[FieldSpec],
    groups: &BTreeMap<String, usize>,
    preprocess: Vec<Preprocess>,
) -> Result<CompiledScheme, StoreError> {
    let mut compiled: Vec<CompiledField> = Vec::with_capacity(fields.len() + preprocess.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for spec in fields {
        if RESERVED_FIELD_NAMES.contains(&spec.name.as_str()) {
            return Err(StoreError::Scheme(format!(
                "field name '{}' is reserved",
                spec.name
            )));
        }
        if index.contains_key(&spec.name) {
            return Err(StoreError::Scheme(format!(
                "duplicate field name '{}'",
                spec.name
            )));
        }
        if spec.vshape.is_empty() {
            return Err(StoreError::Scheme(format!(
                "field '{}' omits its value shape",
                spec.name
            )));
        }
        if let Some(g) = &spec.group {
            if !groups.contains_key(g) {
                return Err(StoreError::Scheme(format!(
                    "field '{}' references undeclared group '{}'",
                    spec.name, g
                )));
            }
        }
        index.insert(spec.name.clone(), compiled.len());
        compiled.push(CompiledField {
            name: spec.name.clone(),
            shape: effective_shape(&spec.vshape, spec.group.as_deref(), groups),
            dtype: spec.dtype,
            episode_const: spec.episode_const,
        });
    }

    // Derived fields: thread each chain's output info from the source
    // field's value shape, then expand by the source field's group.
    for p in &preprocess {
        let source = fields
            .iter()
            .find(|f| f.name == p.source)
            .ok_or_else(|| {
                StoreError::Scheme(format!(
                    "preprocessor for '{}' names no raw field",
                    p.source
                ))
            })?;
        if p.transforms.is_empty() {
            return Err(StoreError::Scheme(format!(
                "preprocessor '{}' -> '{}' has no transforms",
                p.source, p.derived
            )));
        }
        if index.contains_key(&p.derived) {
            return Err(StoreError::Scheme(format!(
                "derived field '{}' collides with an existing field",
                p.derived
            )));
        }
        let mut vshape = source.vshape.clone();
        let mut dtype = source.dtype;
        for t in &p.transforms {
            let (s, d) = t.infer_output(&vshape, dtype)?;
            vshape = s;
            dtype = d;
        }
        index.insert(p.derived.clone(), compiled.len());
        compiled.push(CompiledField {
            name: p.derived.clone(),
            shape: effective_shape(&vshape, source.group.as_deref(), groups),
            dtype,
            episode_const: source.episode_const,
        });
    }

    Ok(CompiledScheme {
        fields: compiled,
        index,
        groups: groups.clone(),
        preprocess,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::OneHot;

    fn groups(n_agents: usize) -> BTreeMap<String, usize> {
        let mut g = BTreeMap::new();
        g.insert("agents".to_string(), n_agents);
        g
    }

    #[test]
    fn group_reference_expands_shape() {
        let fields = vec![FieldSpec::new("obs", &[7]).group("agents")];
        let scheme = compile(&fields, &groups(5), vec![]).unwrap();
        assert_eq!(scheme.field("obs").unwrap().shape, vec![5, 7]);
    }

    #[test]
    fn undeclared_group_is_rejected() {
        let fields = vec![FieldSpec::new("obs", &[7]).group("ghosts")];
        assert!(matches!(
            compile(&fields, &groups(5), vec![]),
            Err(StoreError::Scheme(_))
        ));
    }

    #[test]
    fn duplicate_field_names_are_rejected() {
        let fields = vec![FieldSpec::new("state", &[3]), FieldSpec::new("state", &[3])];
        assert!(matches!(
            compile(&fields, &BTreeMap::new(), vec![]),
            Err(StoreError::Scheme(_))
        ));
    }

    #[test]
    fn empty_value_shape_is_rejected() {
        let fields = vec![FieldSpec::new("state", &[])];
        assert!(matches!(
            compile(&fields, &BTreeMap::new(), vec![]),
            Err(StoreError::Scheme(_))
        ));
    }

    #[test]
    fn reserved_name_is_rejected() {
        let fields = vec![FieldSpec::new("filled", &[1])];
        assert!(matches!(
            compile(&fields, &BTreeMap::new(), vec![]),
            Err(StoreError::Scheme(_))
        ));
    }

    #[test]
    fn derived_field_is_sized_at_compile_time() {
        let fields = vec![FieldSpec::new("actions", &[1])
            .group("agents")
            .dtype(Dtype::I64)];
        let pp = vec![Preprocess::new(
            "actions",
            "actions_onehot",
            Box::new(OneHot::new(9)),
        )];
        let scheme = compile(&fields, &groups(3), pp).unwrap();
        let derived = scheme.field("actions_onehot").unwrap();
        assert_eq!(derived.shape, vec![3, 9]);
        assert_eq!(derived.dtype, Dtype::F32);
        assert!(derived.has_time_axis());
    }

    #[test]
    fn derived_name_collision_is_rejected() {
        let fields = vec![
            FieldSpec::new("actions", &[1]).dtype(Dtype::I64),
            FieldSpec::new("actions_onehot", &[4]),
        ];
        let pp = vec![Preprocess::new(
            "actions",
            "actions_onehot",
            Box::new(OneHot::new(4)),
        )];
        assert!(matches!(
            compile(&fields, &BTreeMap::new(), pp),
            Err(StoreError::Scheme(_))
        ));
    }

    #[test]
    fn preprocessor_with_unknown_source_is_rejected() {
        let pp = vec![Preprocess::new(
            "missing",
            "missing_onehot",
            Box::new(OneHot::new(4)),
        )];
        assert!(matches!(
            compile(&[FieldSpec::new("state", &[3])], &BTreeMap::new(), pp),
            Err(StoreError::Scheme(_))
        ));
    }

    #[test]
    fn scheme_config_yaml_round_trip() {
        use tempdir::TempDir;

        let config = SchemeConfig::new()
            .field(FieldSpec::new("state", &[3]))
            .field(FieldSpec::new("actions", &[1]).group("agents").dtype(Dtype::I64))
            .group("agents", 2);
        let dir = TempDir::new("scheme_config").unwrap();
        let path = dir.path().join("scheme.yaml");
        config.save(&path).unwrap();
        let loaded = SchemeConfig::load(&path).unwrap();
        assert_eq!(config, loaded);
    }
}
