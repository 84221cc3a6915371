use crate::{Error, Result};

pub const MODEL_NAME: &str = "embedder";

/// Sentence embedding model
pub trait TextEmbedder: Send {
  /// One embedding per input text, in input order
  fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Token ids of a batch padded to its longest sequence, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBatch {
  pub ids: Vec<i64>,
  pub mask: Vec<i64>,
  pub type_ids: Vec<i64>,
  pub batch: usize,
  pub length: usize,
}

/// Pad `(ids, attention_mask)` sequences with zeros to a common length
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
pub fn batch_tokens(sequences: &[(&[u32], &[u32])]) -> TokenBatch {
  let batch = sequences.len();
  let length = sequences.iter().map(|(ids, _)| ids.len()).max().unwrap_or(0);

  let mut ids = Vec::with_capacity(batch * length);
  let mut mask = Vec::with_capacity(batch * length);

  for (seq_ids, seq_mask) in sequences {
    for i in 0..length {
      ids.push(seq_ids.get(i).map_or(0, |&id| id as i64));
      mask.push(seq_mask.get(i).map_or(0, |&m| m as i64));
    }
  }

  TokenBatch { ids, mask, type_ids: vec![0; batch * length], batch, length }
}

/// Average token states over the attention mask.
///
/// `hidden` is `[batch, length, dim]` row-major.
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
pub fn mean_pool(hidden: &[f32], mask: &[i64], batch: usize, length: usize, dim: usize) -> Vec<Vec<f32>> {
  (0..batch)
    .map(|b| {
      let mut pooled = vec![0.0f32; dim];
      let mut count = 0.0f32;
      for t in 0..length {
        if mask[b * length + t] == 0 {
          continue;
        }
        let start = (b * length + t) * dim;
        for (acc, value) in pooled.iter_mut().zip(&hidden[start..start + dim]) {
          *acc += value;
        }
        count += 1.0;
      }
      if count > 0.0 {
        pooled.iter_mut().for_each(|v| *v /= count);
      }
      pooled
    })
    .collect()
}

/// Sentence vectors from a model output of shape `dims`.
///
/// Token states (`[batch, length, dim]`) are mean-pooled over the batch's
/// attention mask; pooled outputs (`[batch, dim]`) are split into rows.
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
pub fn sentence_vectors(dims: &[i64], data: &[f32], tokens: &TokenBatch) -> Result<Vec<Vec<f32>>> {
  let shape_error = || Error::model(MODEL_NAME, format!("unexpected output shape {dims:?}"));

  match *dims {
    [batch, length, dim] => {
      let (batch, length, dim) = (batch as usize, length as usize, dim as usize);
      if dim == 0 || batch != tokens.batch || length != tokens.length || data.len() < batch * length * dim {
        return Err(shape_error());
      }
      Ok(mean_pool(data, &tokens.mask, batch, length, dim))
    }
    [batch, dim] => {
      let (batch, dim) = (batch as usize, dim as usize);
      if dim == 0 || data.len() < batch * dim {
        return Err(shape_error());
      }
      Ok(data.chunks(dim).take(batch).map(|row| row.to_vec()).collect())
    }
    _ => Err(shape_error()),
  }
}

#[cfg(feature = "onnx")]
pub use self::onnx_embedder::OnnxSentenceEmbedder;

#[cfg(feature = "onnx")]
mod onnx_embedder {
  use ort::{
    session::Session,
    value::{Tensor, Value},
  };
  use tokenizers::{Tokenizer, TruncationParams};

  use super::{batch_tokens, sentence_vectors, TextEmbedder, MODEL_NAME};
  use crate::retrieval::index::normalize_l2;
  use crate::runtime::{onnx, Device, ModelLocation};
  use crate::{Error, Result};

  const TOKENIZER_FILE: &str = "tokenizer.json";

  /// Transformer sentence encoder with masked mean pooling
  pub struct OnnxSentenceEmbedder {
    session: Session,
    tokenizer: Tokenizer,
    input_names: Vec<String>,
    device: Device,
  }

  impl OnnxSentenceEmbedder {
    pub fn load(location: &ModelLocation, device: Device, max_sequence_length: usize) -> Result<Self> {
      let tokenizer_file = location.fetch(TOKENIZER_FILE)?;
      let mut tokenizer = Tokenizer::from_file(&tokenizer_file)
        .map_err(|e| Error::model(MODEL_NAME, format!("failed to load tokenizer: {e}")))?;
      tokenizer
        .with_truncation(Some(TruncationParams { max_length: max_sequence_length, ..Default::default() }))
        .map_err(|e| Error::model(MODEL_NAME, format!("invalid truncation: {e}")))?;

      let model_path = location.model_path()?;
      location.ensure_external_data();
      let session = onnx::build_session(MODEL_NAME, &model_path, device)?;
      let input_names = onnx::input_names(&session);

      Ok(Self { session, tokenizer, input_names, device })
    }

    fn tensor(&self, data: Vec<i64>, batch: usize, length: usize) -> Result<Value> {
      Tensor::from_array(([batch, length], data.into_boxed_slice()))
        .map(|tensor| tensor.into_dyn())
        .map_err(|e| Error::runtime(MODEL_NAME, e))
    }
  }

  impl TextEmbedder for OnnxSentenceEmbedder {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
      if texts.is_empty() {
        return Ok(Vec::new());
      }

      let encodings = self
        .tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| Error::model(MODEL_NAME, format!("failed to encode texts: {e}")))?;
      let sequences: Vec<(&[u32], &[u32])> =
        encodings.iter().map(|e| (e.get_ids(), e.get_attention_mask())).collect();
      let tokens = batch_tokens(&sequences);
      let (batch, length) = (tokens.batch, tokens.length);

      // only feed what the graph declares; some exports drop token_type_ids
      let mut inputs: Vec<(String, Value)> = Vec::new();
      for name in &self.input_names {
        let data = match name.as_str() {
          "input_ids" => tokens.ids.clone(),
          "attention_mask" => tokens.mask.clone(),
          "token_type_ids" => tokens.type_ids.clone(),
          other => return Err(Error::model(MODEL_NAME, format!("unsupported graph input {other}"))),
        };
        inputs.push((name.clone(), self.tensor(data, batch, length)?));
      }

      let options = onnx::run_options(MODEL_NAME, self.device)?;
      let outputs =
        self.session.run_with_options(inputs, &options).map_err(|e| Error::runtime(MODEL_NAME, e))?;
      let output = outputs
        .get("last_hidden_state")
        .or_else(|| outputs.get("token_embeddings"))
        .or_else(|| outputs.get("sentence_embedding"))
        .ok_or_else(|| Error::model(MODEL_NAME, "no embedding output in graph"))?;

      let (shape, data) = output.try_extract_tensor::<f32>().map_err(|e| Error::runtime(MODEL_NAME, e))?;
      let dims: &[i64] = shape.as_ref();

      bentley::debug!("{MODEL_NAME} output shape {dims:?} for {batch} texts of {length} tokens");
      let mut embeddings = sentence_vectors(dims, data, &tokens)?;

      embeddings.iter_mut().for_each(|e| normalize_l2(e));
      Ok(embeddings)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_batch_tokens_pads_to_longest_sequence() {
    let long_ids = [101u32, 7, 8, 102];
    let long_mask = [1u32, 1, 1, 1];
    let short_ids = [101u32, 102];
    let short_mask = [1u32, 1];

    let sequences: [(&[u32], &[u32]); 2] = [(&long_ids, &long_mask), (&short_ids, &short_mask)];
    let tokens = batch_tokens(&sequences);

    assert_eq!(tokens.batch, 2);
    assert_eq!(tokens.length, 4);
    assert_eq!(tokens.ids, vec![101, 7, 8, 102, 101, 102, 0, 0]);
    assert_eq!(tokens.mask, vec![1, 1, 1, 1, 1, 1, 0, 0]);
    assert!(tokens.type_ids.iter().all(|&t| t == 0));
  }

  #[test]
  fn test_mean_pool_ignores_padding() {
    // batch 1, length 3, dim 2; last token is padding
    let hidden = [1.0, 2.0, 3.0, 4.0, 100.0, 100.0];
    let mask = [1, 1, 0];

    let pooled = mean_pool(&hidden, &mask, 1, 3, 2);
    assert_eq!(pooled, vec![vec![2.0, 3.0]]);
  }

  fn one_text(length: usize) -> TokenBatch {
    TokenBatch { ids: vec![1; length], mask: vec![1; length], type_ids: vec![0; length], batch: 1, length }
  }

  #[test]
  fn test_token_states_are_pooled_and_rows_are_split() -> Result<()> {
    let states = [1.0, 2.0, 3.0, 4.0];
    assert_eq!(sentence_vectors(&[1, 2, 2], &states, &one_text(2))?, vec![vec![2.0, 3.0]]);

    let mut batch = one_text(1);
    batch.batch = 2;
    batch.mask = vec![1, 1];
    assert_eq!(sentence_vectors(&[2, 2], &states, &batch)?, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    Ok(())
  }

  #[test]
  fn test_zero_width_output_is_a_model_error() {
    assert!(matches!(sentence_vectors(&[1, 0], &[], &one_text(2)), Err(Error::Model { .. })));
    assert!(matches!(sentence_vectors(&[1, 2, 0], &[], &one_text(2)), Err(Error::Model { .. })));
  }

  #[test]
  fn test_short_or_mismatched_output_is_a_model_error() {
    assert!(sentence_vectors(&[1, 3, 2], &[0.0; 6], &one_text(2)).is_err());
    assert!(sentence_vectors(&[2, 4], &[0.0; 4], &one_text(2)).is_err());
    assert!(sentence_vectors(&[4], &[0.0; 4], &one_text(2)).is_err());
  }
}
