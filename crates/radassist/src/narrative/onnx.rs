//! Decoder-only language model exported to ONNX with a key/value cache
//! (`past_key_values.N.{key,value}` in, `present.N.{key,value}` out)

use ndarray::{Array2, ArrayD, IxDyn};
use ort::{session::Session, value::Value};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::Path;
use tokenizers::Tokenizer;

use super::sampling::{self, CausalDecoder, SamplingParams};
use super::{TextGenerator, MODEL_NAME};
use crate::runtime::{onnx, Device, ModelLocation};
use crate::{Error, Result};

const PAST_PREFIX: &str = "past_key_values";
const PRESENT_PREFIX: &str = "present";

/// Attention geometry needed to seed an empty cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheShape {
  kv_heads: usize,
  head_dim: usize,
}

impl CacheShape {
  fn from_config(config: &serde_json::Value) -> Result<Self> {
    let get = |key: &str| config.get(key).and_then(|v| v.as_u64()).map(|v| v as usize);
    let missing = |key: &str| Error::model(MODEL_NAME, format!("config.json has no {key}"));

    let heads = get("num_attention_heads").ok_or_else(|| missing("num_attention_heads"))?;
    let kv_heads = get("num_key_value_heads").unwrap_or(heads);
    let head_dim = match get("head_dim") {
      Some(dim) => dim,
      None => get("hidden_size").ok_or_else(|| missing("hidden_size"))? / heads.max(1),
    };
    Ok(Self { kv_heads, head_dim })
  }
}

/// End-of-sequence ids; `eos_token_id` may be a number or a list
fn eos_ids(config: &serde_json::Value) -> Vec<u32> {
  match config.get("eos_token_id") {
    Some(serde_json::Value::Number(n)) => n.as_u64().map(|id| vec![id as u32]).unwrap_or_default(),
    Some(serde_json::Value::Array(items)) => items.iter().filter_map(|v| v.as_u64()).map(|id| id as u32).collect(),
    _ => Vec::new(),
  }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
  let content = std::fs::read_to_string(path)?;
  serde_json::from_str(&content)
    .map_err(|e| Error::model(MODEL_NAME, format!("cannot parse {}: {e}", path.display())))
}

/// The ONNX graph plus its running key/value cache
struct CachedSession {
  session: Session,
  device: Device,
  input_names: Vec<String>,
  output_names: Vec<String>,
  shape: CacheShape,
  cache: HashMap<String, ArrayD<f32>>,
  cached_len: usize,
}

impl CachedSession {
  fn clear(&mut self) {
    self.cache.clear();
    self.cached_len = 0;
  }

  fn empty_cache_entry(&self) -> ArrayD<f32> {
    ArrayD::zeros(IxDyn(&[1, self.shape.kv_heads, 0, self.shape.head_dim]))
  }
}

fn row_tensor(values: Vec<i64>) -> Result<Value> {
  let len = values.len();
  let array = Array2::from_shape_vec((1, len), values).map_err(|e| Error::model(MODEL_NAME, e))?;
  Ok(Value::from_array(array).map_err(|e| Error::runtime(MODEL_NAME, e))?.into())
}

impl CausalDecoder for CachedSession {
  fn step(&mut self, tokens: &[u32]) -> Result<Vec<f32>> {
    let past = self.cached_len;
    let total = past + tokens.len();

    let mut inputs: HashMap<String, Value> = HashMap::new();
    for name in &self.input_names {
      let value = match name.as_str() {
        "input_ids" => row_tensor(tokens.iter().map(|&t| t as i64).collect())?,
        "attention_mask" => row_tensor(vec![1; total])?,
        "position_ids" => row_tensor((past..total).map(|p| p as i64).collect())?,
        cached if cached.starts_with(PAST_PREFIX) => {
          let entry = match self.cache.remove(cached) {
            Some(entry) => entry,
            None => self.empty_cache_entry(),
          };
          Value::from_array(entry).map_err(|e| Error::runtime(MODEL_NAME, e))?.into()
        }
        other => return Err(Error::model(MODEL_NAME, format!("unsupported graph input {other}"))),
      };
      inputs.insert(name.clone(), value);
    }

    let options = onnx::run_options(MODEL_NAME, self.device)?;
    let outputs = self.session.run_with_options(inputs, &options).map_err(|e| Error::runtime(MODEL_NAME, e))?;

    let logits = outputs.get("logits").ok_or_else(|| Error::model(MODEL_NAME, "graph has no logits output"))?;
    let (shape, data) = logits.try_extract_tensor::<f32>().map_err(|e| Error::runtime(MODEL_NAME, e))?;
    let dims: &[i64] = shape.as_ref();
    let vocab = dims.last().copied().unwrap_or(0) as usize;
    if vocab == 0 || data.len() < vocab {
      return Err(Error::model(MODEL_NAME, format!("unexpected logits shape {dims:?}")));
    }
    let next_logits = data[data.len() - vocab..].to_vec();

    for name in &self.output_names {
      let Some(suffix) = name.strip_prefix(PRESENT_PREFIX) else {
        continue;
      };
      let Some(value) = outputs.get(name.as_str()) else {
        continue;
      };
      let present = value.try_extract_array::<f32>().map_err(|e| Error::runtime(MODEL_NAME, e))?;
      self.cache.insert(format!("{PAST_PREFIX}{suffix}"), present.to_owned());
    }
    self.cached_len = total;

    Ok(next_logits)
  }
}

/// Sampling text generator over an ONNX causal LM
pub struct OnnxCausalLm {
  decoder: CachedSession,
  tokenizer: Tokenizer,
  eos: Vec<u32>,
  rng: StdRng,
}

impl OnnxCausalLm {
  pub fn load(location: &ModelLocation, device: Device, seed: Option<u64>) -> Result<Self> {
    let tokenizer = Tokenizer::from_file(location.fetch("tokenizer.json")?)
      .map_err(|e| Error::model(MODEL_NAME, format!("failed to load tokenizer: {e}")))?;

    let config = read_json(&location.fetch("config.json")?)?;
    let shape = CacheShape::from_config(&config)?;

    let mut eos = eos_ids(&config);
    if let Some(path) = location.fetch_optional("generation_config.json") {
      for id in eos_ids(&read_json(&path)?) {
        if !eos.contains(&id) {
          eos.push(id);
        }
      }
    }
    if eos.is_empty() {
      bentley::warn!("{} declares no end-of-sequence token; generation runs to the token budget", location.describe());
    }

    let model_path = location.model_path()?;
    location.ensure_external_data();
    let session = onnx::build_session(MODEL_NAME, &model_path, device)?;
    let input_names = onnx::input_names(&session);
    let output_names = onnx::output_names(&session);

    let rng = match seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_os_rng(),
    };

    Ok(Self {
      decoder: CachedSession {
        session,
        device,
        input_names,
        output_names,
        shape,
        cache: HashMap::new(),
        cached_len: 0,
      },
      tokenizer,
      eos,
      rng,
    })
  }
}

impl TextGenerator for OnnxCausalLm {
  fn generate(&mut self, prompt: &str, params: &SamplingParams) -> Result<String> {
    let encoding = self
      .tokenizer
      .encode(prompt, true)
      .map_err(|e| Error::model(MODEL_NAME, format!("failed to encode prompt: {e}")))?;
    let prompt_ids = encoding.get_ids();
    if prompt_ids.is_empty() {
      return Err(Error::model(MODEL_NAME, "prompt encodes to no tokens"));
    }

    self.decoder.clear();
    let generated = sampling::decode(&mut self.decoder, prompt_ids, &self.eos, params, &mut self.rng)?;
    bentley::verbose!("generated {} tokens from a {} token prompt", generated.len(), prompt_ids.len());

    let continuation = self
      .tokenizer
      .decode(&generated, true)
      .map_err(|e| Error::model(MODEL_NAME, format!("failed to decode tokens: {e}")))?;
    Ok(format!("{prompt}{continuation}"))
  }

  fn release_transient(&mut self) {
    self.decoder.clear();
  }
}
