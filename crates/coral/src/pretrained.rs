//! Pretrained-weight transplant for the shared feature extractor.
//!
//! Weights travel as a JSON map from parameter name to tensor blob. Loading
//! intersects the map with the extractor's parameters by name: present names
//! replace the initialization, absent names keep it (with a warning), and
//! entries matching no parameter are discarded. The classifier head is never
//! touched.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use burn::module::Param;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use serde::{Deserialize, Serialize};

use crate::error::CoralError;
use crate::model::network::SharedNet;

/// One serialized parameter tensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorBlob {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// Named parameter tensors, keyed like `conv1.weight`.
pub type NamedTensors = HashMap<String, TensorBlob>;

/// Parameter names the extractor exports and imports, in layer order.
pub const SHARED_PARAMETERS: [&str; 8] = [
    "conv1.weight",
    "conv1.bias",
    "conv2.weight",
    "conv2.bias",
    "fc1.weight",
    "fc1.bias",
    "fc2.weight",
    "fc2.bias",
];

/// Counts describing one transplant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransplantReport {
    /// Parameters replaced from the map.
    pub loaded: usize,
    /// Extractor parameters the map did not name.
    pub missing: usize,
    /// Map entries naming no extractor parameter.
    pub discarded: usize,
}

/// Read a named-tensor map from a JSON file.
pub fn load_named_tensors(path: &Path) -> Result<NamedTensors, CoralError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Write a named-tensor map as JSON.
pub fn save_named_tensors(path: &Path, tensors: &NamedTensors) -> Result<(), CoralError> {
    let file = File::create(path)?;
    Ok(serde_json::to_writer(BufWriter::new(file), tensors)?)
}

fn take_tensor<B: Backend, const D: usize>(
    tensors: &NamedTensors,
    name: &str,
    expected: [usize; D],
    device: &B::Device,
) -> Result<Option<Tensor<B, D>>, CoralError> {
    let Some(blob) = tensors.get(name) else {
        tracing::warn!(
            parameter = name,
            "pretrained map misses parameter, keeping initialization"
        );
        return Ok(None);
    };
    if blob.shape != expected {
        return Err(CoralError::ShapeMismatch(format!(
            "pretrained {name}: stored shape {:?}, model expects {:?}",
            blob.shape, expected
        )));
    }
    let count: usize = expected.iter().product();
    if blob.values.len() != count {
        return Err(CoralError::ShapeMismatch(format!(
            "pretrained {name}: {} values for shape {:?}",
            blob.values.len(),
            blob.shape
        )));
    }
    Ok(Some(Tensor::from_data(
        TensorData::new(blob.values.clone(), expected),
        device,
    )))
}

fn apply_param<B: Backend, const D: usize>(
    param: &mut Param<Tensor<B, D>>,
    tensors: &NamedTensors,
    name: &str,
    device: &B::Device,
    loaded: &mut usize,
    missing: &mut usize,
) -> Result<(), CoralError> {
    let expected = param.val().dims();
    match take_tensor::<B, D>(tensors, name, expected, device)? {
        Some(tensor) => {
            *param = Param::from_tensor(tensor);
            *loaded += 1;
        }
        None => *missing += 1,
    }
    Ok(())
}

fn apply_bias<B: Backend>(
    bias: &mut Option<Param<Tensor<B, 1>>>,
    tensors: &NamedTensors,
    name: &str,
    device: &B::Device,
    loaded: &mut usize,
    missing: &mut usize,
) -> Result<(), CoralError> {
    match bias {
        Some(param) => apply_param(param, tensors, name, device, loaded, missing),
        None => {
            tracing::warn!(parameter = name, "model has no such parameter, skipping");
            Ok(())
        }
    }
}

/// Replace the extractor's parameters with matching entries from `tensors`.
///
/// Missing names are logged and keep their initialization; entries naming
/// nothing are counted as discarded. A present entry with the wrong shape is
/// an error.
pub fn apply_to_shared<B: Backend>(
    mut shared: SharedNet<B>,
    tensors: &NamedTensors,
    device: &B::Device,
) -> Result<(SharedNet<B>, TransplantReport), CoralError> {
    let mut loaded = 0usize;
    let mut missing = 0usize;

    apply_param(
        &mut shared.conv1.weight,
        tensors,
        "conv1.weight",
        device,
        &mut loaded,
        &mut missing,
    )?;
    apply_bias(
        &mut shared.conv1.bias,
        tensors,
        "conv1.bias",
        device,
        &mut loaded,
        &mut missing,
    )?;
    apply_param(
        &mut shared.conv2.weight,
        tensors,
        "conv2.weight",
        device,
        &mut loaded,
        &mut missing,
    )?;
    apply_bias(
        &mut shared.conv2.bias,
        tensors,
        "conv2.bias",
        device,
        &mut loaded,
        &mut missing,
    )?;
    apply_param(
        &mut shared.fc1.weight,
        tensors,
        "fc1.weight",
        device,
        &mut loaded,
        &mut missing,
    )?;
    apply_bias(
        &mut shared.fc1.bias,
        tensors,
        "fc1.bias",
        device,
        &mut loaded,
        &mut missing,
    )?;
    apply_param(
        &mut shared.fc2.weight,
        tensors,
        "fc2.weight",
        device,
        &mut loaded,
        &mut missing,
    )?;
    apply_bias(
        &mut shared.fc2.bias,
        tensors,
        "fc2.bias",
        device,
        &mut loaded,
        &mut missing,
    )?;

    let discarded = tensors
        .keys()
        .filter(|name| !SHARED_PARAMETERS.contains(&name.as_str()))
        .count();
    if discarded > 0 {
        tracing::debug!(discarded, "pretrained map carries unmatched entries");
    }

    Ok((
        shared,
        TransplantReport {
            loaded,
            missing,
            discarded,
        },
    ))
}

fn export_param<B: Backend, const D: usize>(
    tensors: &mut NamedTensors,
    name: &str,
    value: Tensor<B, D>,
) -> Result<(), CoralError> {
    let shape = value.dims().to_vec();
    let values = value
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| CoralError::InvalidInput(format!("parameter {name}: {err:?}")))?;
    tensors.insert(name.to_string(), TensorBlob { shape, values });
    Ok(())
}

fn export_bias<B: Backend>(
    tensors: &mut NamedTensors,
    name: &str,
    bias: Option<&Param<Tensor<B, 1>>>,
) -> Result<(), CoralError> {
    if let Some(param) = bias {
        export_param(tensors, name, param.val())?;
    }
    Ok(())
}

/// Serialize the extractor's parameters to a named map, the inverse of
/// [`apply_to_shared`].
pub fn export_shared<B: Backend>(shared: &SharedNet<B>) -> Result<NamedTensors, CoralError> {
    let mut tensors = NamedTensors::new();
    export_param(&mut tensors, "conv1.weight", shared.conv1.weight.val())?;
    export_bias(&mut tensors, "conv1.bias", shared.conv1.bias.as_ref())?;
    export_param(&mut tensors, "conv2.weight", shared.conv2.weight.val())?;
    export_bias(&mut tensors, "conv2.bias", shared.conv2.bias.as_ref())?;
    export_param(&mut tensors, "fc1.weight", shared.fc1.weight.val())?;
    export_bias(&mut tensors, "fc1.bias", shared.fc1.bias.as_ref())?;
    export_param(&mut tensors, "fc2.weight", shared.fc2.weight.val())?;
    export_bias(&mut tensors, "fc2.bias", shared.fc2.bias.as_ref())?;
    Ok(tensors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::network::SharedNetConfig;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn small_shared(device: &NdArrayDevice) -> SharedNet<TestBackend> {
        SharedNetConfig::new()
            .with_in_channels(1)
            .with_image_size(4)
            .with_conv1_channels(2)
            .with_conv2_channels(2)
            .with_hidden_size(4)
            .with_feature_size(3)
            .init(device)
    }

    #[test]
    fn export_then_apply_reproduces_outputs() {
        let device = Default::default();
        let donor = small_shared(&device);
        let map = export_shared(&donor).unwrap();
        let recipient = small_shared(&device);
        let (transplanted, report) = apply_to_shared(recipient, &map, &device).unwrap();
        assert_eq!(report.loaded, 8);
        assert_eq!(report.missing, 0);
        assert_eq!(report.discarded, 0);
        let input =
            Tensor::<TestBackend, 4>::random([2, 1, 4, 4], Distribution::Default, &device);
        let a = donor
            .forward(input.clone())
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let b = transplanted
            .forward(input)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_names_keep_initialization() {
        let device = Default::default();
        let donor = small_shared(&device);
        let mut map = export_shared(&donor).unwrap();
        map.remove("fc2.weight");
        map.remove("fc2.bias");
        let recipient = small_shared(&device);
        let before = recipient
            .fc2
            .weight
            .val()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let (transplanted, report) = apply_to_shared(recipient, &map, &device).unwrap();
        assert_eq!(report.loaded, 6);
        assert_eq!(report.missing, 2);
        let after = transplanted
            .fc2
            .weight
            .val()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn unknown_entries_are_discarded() {
        let device = Default::default();
        let mut map = export_shared(&small_shared(&device)).unwrap();
        map.insert(
            "classifier.weight".to_string(),
            TensorBlob {
                shape: vec![2, 2],
                values: vec![0.0; 4],
            },
        );
        let (_, report) = apply_to_shared(small_shared(&device), &map, &device).unwrap();
        assert_eq!(report.loaded, 8);
        assert_eq!(report.missing, 0);
        assert_eq!(report.discarded, 1);
    }

    #[test]
    fn wrong_shape_is_an_error() {
        let device = Default::default();
        let mut map = export_shared(&small_shared(&device)).unwrap();
        map.insert(
            "fc1.weight".to_string(),
            TensorBlob {
                shape: vec![3, 3],
                values: vec![0.0; 9],
            },
        );
        let err = apply_to_shared(small_shared(&device), &map, &device).unwrap_err();
        assert!(matches!(err, CoralError::ShapeMismatch(_)));
    }

    #[test]
    fn json_round_trip() {
        let device = Default::default();
        let map = export_shared(&small_shared(&device)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");
        save_named_tensors(&path, &map).unwrap();
        let loaded = load_named_tensors(&path).unwrap();
        assert_eq!(loaded.len(), map.len());
        assert_eq!(loaded["conv1.weight"].shape, map["conv1.weight"].shape);
        assert_eq!(loaded["fc2.bias"].values, map["fc2.bias"].values);
    }
}
