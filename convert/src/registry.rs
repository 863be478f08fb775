use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;

use crate::internal::*;
use crate::ops::LayerConverter;

/// Builds the converter bound to one layer.
pub type ConverterBuilder = fn(&Layer) -> CastResult<Box<dyn LayerConverter>>;

/// Converter builders keyed by layer type name, plus the fallback used for
/// layers no native converter accepts.
#[derive(Clone)]
pub struct Registry {
    builders: HashMap<String, ConverterBuilder>,
    fallback: Option<ConverterBuilder>,
    warnings: Vec<String>,
}

impl Registry {
    /// A registry with no converter at all.
    pub fn empty() -> Registry {
        Registry { builders: HashMap::new(), fallback: None, warnings: vec![] }
    }

    /// Registers `builder` for `type_name`, or as the fallback when `None`.
    pub fn insert(&mut self, type_name: Option<&str>, builder: ConverterBuilder) {
        let previous = match type_name {
            Some(name) => self.builders.insert(name.to_string(), builder),
            None => self.fallback.replace(builder),
        };
        if previous.is_some() {
            let name = type_name.unwrap_or("None");
            let msg = format!("Layer '{name}' already has a converter. Overwriting.");
            warn!("{msg}");
            self.warnings.push(msg);
        }
    }

    pub fn lookup(&self, type_name: &str) -> Option<ConverterBuilder> {
        self.builders.get(type_name).copied()
    }

    pub fn fallback(&self) -> Option<ConverterBuilder> {
        self.fallback
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(|k| k.as_str())
    }

    /// Overwrite warnings emitted while registering.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl Default for Registry {
    fn default() -> Registry {
        let mut reg = Registry::empty();
        crate::ops::register_all(&mut reg);
        reg
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = self.type_names().sorted().collect_vec();
        f.debug_struct("Registry")
            .field("types", &names)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_cover_builtin_layers() {
        let reg = Registry::default();
        for name in [
            "InputLayer",
            "Dense",
            "Conv1D",
            "Conv2D",
            "Conv3D",
            "AveragePooling2D",
            "GlobalMaxPooling3D",
            "BatchNormalization",
            "Concatenate",
            "Flatten",
            "Reshape",
            "Activation",
            "ReLU",
            "LeakyReLU",
            "Add",
            "Average",
            "UpSampling2D",
            "ZeroPadding1D",
            "Functional",
            "Sequential",
        ] {
            assert!(reg.lookup(name).is_some(), "{name} is not registered");
        }
        assert!(reg.fallback().is_some());
        assert!(reg.warnings().is_empty());
    }

    #[test]
    fn overwriting_warns() {
        let mut reg = Registry::default();
        let dense = reg.lookup("Dense").unwrap();
        reg.insert(Some("Dense"), dense);
        let expected = "Layer 'Dense' already has a converter. Overwriting.".to_string();
        assert_eq!(reg.warnings(), &[expected]);
        let fallback = reg.fallback().unwrap();
        reg.insert(None, fallback);
        assert_eq!(reg.warnings().len(), 2);
    }
}
