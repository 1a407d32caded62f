//! JSON description of a node tree.
//!
//! ```json
//! {
//!   "attributes": [{ "name": "title", "type": "char", "data": "run 42" }],
//!   "children": [{
//!     "name": "entry1", "class": "NXentry",
//!     "children": [
//!       { "name": "det1", "class": "NXdetector", "handle": "det",
//!         "value": { "type": "float32", "shape": [3], "data": [1, 2, 3] } },
//!       { "name": "data", "class": "NXdata",
//!         "links": [{ "name": "signal", "target": "det" }] }
//!     ]
//!   }]
//! }
//! ```
//!
//! Nodes without a `class` are plain datasets. A value without a `shape` is
//! one-dimensional. Link targets are handle names declared by some node's
//! `handle`.

use crate::{CliError, Result};
use nxtree_core::{ArrayData, ElementType, NodeId, DATASET_CLASS};
use nxtree_io::{NexusApi, NexusWriter};
use serde::Deserialize;
use serde_json::Number;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Manifest {
    #[serde(default)]
    pub(crate) attributes: Vec<ManifestAttribute>,
    #[serde(default)]
    pub(crate) children: Vec<ManifestNode>,
    #[serde(default)]
    pub(crate) links: Vec<ManifestLink>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ManifestNode {
    pub(crate) name: String,
    #[serde(rename = "class", default = "dataset_class")]
    pub(crate) class_name: String,
    #[serde(default)]
    pub(crate) value: Option<ManifestValue>,
    #[serde(default)]
    pub(crate) attributes: Vec<ManifestAttribute>,
    #[serde(default)]
    pub(crate) children: Vec<ManifestNode>,
    #[serde(default)]
    pub(crate) links: Vec<ManifestLink>,
    /// Handle other nodes may link to.
    #[serde(default)]
    pub(crate) handle: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ManifestValue {
    #[serde(rename = "type")]
    pub(crate) element_type: ElementType,
    #[serde(default)]
    pub(crate) shape: Option<Vec<usize>>,
    pub(crate) data: ManifestData,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ManifestData {
    Text(String),
    Numbers(Vec<Number>),
}

#[derive(Debug, Deserialize)]
pub(crate) struct ManifestAttribute {
    pub(crate) name: String,
    #[serde(flatten)]
    pub(crate) value: ManifestValue,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ManifestLink {
    pub(crate) name: String,
    pub(crate) target: String,
}

fn dataset_class() -> String {
    DATASET_CLASS.to_string()
}

impl Manifest {
    pub(crate) fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Adds every declared node, attribute and link below the writer's root.
    /// Returns the number of nodes created.
    pub(crate) fn build<A: NexusApi>(&self, writer: &mut NexusWriter<A>) -> Result<usize> {
        let root = writer.root();
        for attribute in &self.attributes {
            attribute.apply(writer, root)?;
        }
        let mut created = 0;
        for child in &self.children {
            created += child.build(writer, root)?;
        }
        for link in &self.links {
            writer.add_link_to_handle(root, &link.name, &link.target)?;
        }
        Ok(created)
    }
}

impl ManifestNode {
    fn build<A: NexusApi>(&self, writer: &mut NexusWriter<A>, parent: NodeId) -> Result<usize> {
        let id = writer.create_child(parent, &self.name, &self.class_name)?;
        if let Some(value) = &self.value {
            let (shape, data) = value.to_array()?;
            writer.set_value(id, value.element_type, &shape, data)?;
        }
        for attribute in &self.attributes {
            attribute.apply(writer, id)?;
        }
        if let Some(handle) = &self.handle {
            writer.set_link_handle(id, handle)?;
        }

        let mut created = 1;
        for child in &self.children {
            created += child.build(writer, id)?;
        }
        for link in &self.links {
            writer.add_link_to_handle(id, &link.name, &link.target)?;
        }
        Ok(created)
    }
}

impl ManifestAttribute {
    fn apply<A: NexusApi>(&self, writer: &mut NexusWriter<A>, node: NodeId) -> Result<()> {
        let (shape, data) = self.value.to_array()?;
        writer.add_attribute(node, &self.name, self.value.element_type, &shape, data)?;
        Ok(())
    }
}

impl ManifestValue {
    fn to_array(&self) -> Result<(Vec<usize>, ArrayData)> {
        let data = match &self.data {
            ManifestData::Text(text) if self.element_type.is_char() => ArrayData::from(text.as_str()),
            ManifestData::Text(_) => {
                return Err(CliError::Manifest(format!(
                    "text given for a {} value",
                    self.element_type
                )))
            }
            ManifestData::Numbers(numbers) => convert(numbers, self.element_type)?,
        };
        let shape = self.shape.clone().unwrap_or_else(|| vec![data.len()]);
        Ok((shape, data))
    }
}

fn convert(numbers: &[Number], element_type: ElementType) -> Result<ArrayData> {
    macro_rules! ints {
        ($variant:ident) => {
            ArrayData::$variant(numbers.iter().map(int).collect::<Result<Vec<_>>>()?)
        };
    }

    Ok(match element_type {
        ElementType::Int8 => ints!(Int8),
        ElementType::UInt8 => ints!(UInt8),
        ElementType::Char => ints!(Char),
        ElementType::Int16 => ints!(Int16),
        ElementType::UInt16 => ints!(UInt16),
        ElementType::Int32 => ints!(Int32),
        ElementType::UInt32 => ints!(UInt32),
        ElementType::Int64 => ints!(Int64),
        ElementType::UInt64 => ArrayData::UInt64(
            numbers
                .iter()
                .map(|n| n.as_u64().ok_or_else(|| out_of_range(n)))
                .collect::<Result<Vec<_>>>()?,
        ),
        ElementType::Float32 => ArrayData::Float32(
            numbers
                .iter()
                .map(|n| float(n).map(|v| v as f32))
                .collect::<Result<Vec<_>>>()?,
        ),
        ElementType::Float64 => {
            ArrayData::Float64(numbers.iter().map(float).collect::<Result<Vec<_>>>()?)
        }
    })
}

fn int<T: TryFrom<i64>>(n: &Number) -> Result<T> {
    n.as_i64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| out_of_range(n))
}

fn float(n: &Number) -> Result<f64> {
    n.as_f64().ok_or_else(|| out_of_range(n))
}

fn out_of_range(n: &Number) -> CliError {
    CliError::Manifest(format!("{n} is out of range for its element type"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nxtree_io::{MemoryApi, WriterConfig};

    const SAMPLE: &str = r#"{
        "attributes": [{ "name": "title", "type": "char", "data": "run 42" }],
        "children": [{
            "name": "entry1", "class": "NXentry",
            "children": [
                { "name": "data", "class": "NXdata",
                  "links": [{ "name": "signal", "target": "det" }] },
                { "name": "det1", "class": "NXdetector", "handle": "det",
                  "attributes": [{ "name": "units", "type": "char", "data": "counts" }],
                  "value": { "type": "int32", "shape": [2, 2], "data": [1, 2, 3, 4] } },
                { "name": "tof", "value": { "type": "float64", "data": [0.5, 1.5] } }
            ]
        }]
    }"#;

    fn writer() -> NexusWriter<MemoryApi> {
        NexusWriter::with_api(MemoryApi::new(), WriterConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_defaults() {
        let manifest = Manifest::from_json(SAMPLE).unwrap();
        assert_eq!(manifest.children.len(), 1);
        let tof = &manifest.children[0].children[2];
        assert_eq!(tof.class_name, DATASET_CLASS);
        let (shape, data) = tof.value.as_ref().unwrap().to_array().unwrap();
        assert_eq!(shape, vec![2]);
        assert_eq!(data, ArrayData::Float64(vec![0.5, 1.5]));
    }

    #[test]
    fn test_build_and_write() {
        let manifest = Manifest::from_json(SAMPLE).unwrap();
        let mut w = writer();
        assert_eq!(manifest.build(&mut w).unwrap(), 4);

        let root = w.root();
        w.write(root).unwrap();
        assert_eq!(w.error_message(root).unwrap(), "");

        let api = w.api();
        assert_eq!(
            api.object("/entry1/data/signal").unwrap().data(),
            Some(&ArrayData::Int32(vec![1, 2, 3, 4]))
        );
        assert_eq!(api.object("/entry1/det1").unwrap().shape(), &[2, 2]);
        assert_eq!(
            api.object("/").unwrap().attribute("title").unwrap().as_text(),
            Some("run 42")
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        let text = r#"{ "children": [{ "name": "x", "value": { "type": "int8", "data": [300] } }] }"#;
        let manifest = Manifest::from_json(text).unwrap();
        assert!(matches!(
            manifest.build(&mut writer()),
            Err(CliError::Manifest(_))
        ));

        let text = r#"{ "children": [{ "name": "x", "value": { "type": "int8", "data": "abc" } }] }"#;
        let manifest = Manifest::from_json(text).unwrap();
        assert!(manifest.build(&mut writer()).is_err());

        let text = r#"{ "children": [{ "name": "x", "value": { "type": "int8", "shape": [3], "data": [1] } }] }"#;
        let manifest = Manifest::from_json(text).unwrap();
        assert!(matches!(
            manifest.build(&mut writer()),
            Err(CliError::NxtreeIo(_))
        ));

        assert!(matches!(
            Manifest::from_json(r#"{ "nodes": [] }"#),
            Err(CliError::Json(_))
        ));
    }
}
