use ndarray::Array4;
use ort::{session::Session, value::Tensor};

use super::{PathologyModel, MODEL_NAME};
use crate::runtime::{onnx, Device, ModelLocation};
use crate::{Error, Result};

/// DenseNet pathology classifier exported to ONNX
pub struct OnnxPathologyModel {
  session: Session,
  device: Device,
  input_name: String,
  output_name: String,
}

impl OnnxPathologyModel {
  pub fn load(location: &ModelLocation, device: Device) -> Result<Self> {
    let model_path = location.model_path()?;
    location.ensure_external_data();

    let session = onnx::build_session(MODEL_NAME, &model_path, device)?;
    let input_name = onnx::input_names(&session)
      .into_iter()
      .next()
      .ok_or_else(|| Error::model(MODEL_NAME, "graph declares no inputs"))?;
    let output_name = onnx::output_names(&session)
      .into_iter()
      .next()
      .ok_or_else(|| Error::model(MODEL_NAME, "graph declares no outputs"))?;

    Ok(Self { session, device, input_name, output_name })
  }
}

impl PathologyModel for OnnxPathologyModel {
  fn infer(&mut self, image: &Array4<f32>) -> Result<Vec<f32>> {
    let tensor = Tensor::from_array(image.clone()).map_err(|e| Error::runtime(MODEL_NAME, e))?;
    let options = onnx::run_options(MODEL_NAME, self.device)?;

    let outputs = self
      .session
      .run_with_options(ort::inputs![self.input_name.as_str() => tensor], &options)
      .map_err(|e| Error::runtime(MODEL_NAME, e))?;

    let output = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| Error::model(MODEL_NAME, format!("missing output {}", self.output_name)))?;
    let (_shape, data) =
      output.try_extract_tensor::<f32>().map_err(|e| Error::runtime(MODEL_NAME, e))?;

    Ok(data.to_vec())
  }
}
