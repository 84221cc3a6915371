use once_cell::sync::OnceCell;
use std::sync::Mutex;

use crate::{Error, Result};

type Loader<M> = Box<dyn Fn() -> Result<M> + Send + Sync>;

/// A model that is loaded on first use and then owned for the life of the
/// service.
///
/// Loading runs at most once at a time and at most once successfully; a
/// failed load leaves the slot empty so the next call tries again. Every
/// use takes the model's lock, so inference on one model is serialized.
pub struct LazyModel<M> {
  name: &'static str,
  cell: OnceCell<Mutex<M>>,
  loader: Loader<M>,
}

impl<M> LazyModel<M> {
  pub fn new(name: &'static str, loader: impl Fn() -> Result<M> + Send + Sync + 'static) -> Self {
    Self { name, cell: OnceCell::new(), loader: Box::new(loader) }
  }

  pub fn is_loaded(&self) -> bool {
    self.cell.get().is_some()
  }

  /// Run `f` with exclusive access to the model, loading it first if needed
  pub fn with<R>(&self, f: impl FnOnce(&mut M) -> Result<R>) -> Result<R> {
    let slot = self.slot()?;
    let mut model = slot.lock().map_err(|_| Error::model(self.name, "model lock poisoned"))?;
    f(&mut model)
  }

  fn slot(&self) -> Result<&Mutex<M>> {
    self.cell.get_or_try_init(|| {
      bentley::info!("loading {} model...", self.name);
      let model = (self.loader)().inspect_err(|e| {
        bentley::error!("failed to load {} model: {e}", self.name);
      })?;
      bentley::success!("{} model loaded", self.name);
      Ok(Mutex::new(model))
    })
  }
}
