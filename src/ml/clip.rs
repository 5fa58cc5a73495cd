// ============================================================
// Layer 5 — Global-Norm Gradient Clipping
// ============================================================
// Burn's built-in GradientClipping works per parameter. Here
// every gradient is scaled by one shared factor:
//
//   norm  = √(Σ_p ‖g_p‖²)
//   scale = clip / max(norm, clip)
//
// so gradients are left alone while the global norm is within
// the bound. A non-positive clip disables clipping.
//
// Gradients live in GradientsParams keyed by ParamId; the
// module is walked with a ModuleVisitor to enumerate the ids.

use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::marker::PhantomData;

struct SquaredNorm<'a, B: AutodiffBackend> {
    grads:  &'a GradientsParams,
    sum_sq: f64,
    _b:     PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.sum_sq += grad.powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        }
    }
}

struct Rescale<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    scale: f64,
    _b:    PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Rescale<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads.register::<B::InnerBackend, D>(id, grad.mul_scalar(self.scale));
        }
    }
}

/// L2 norm of all gradients of `model` taken together.
pub fn global_norm<B, M>(model: &M, grads: &GradientsParams) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut visitor = SquaredNorm::<B> { grads, sum_sq: 0.0, _b: PhantomData };
    model.visit(&mut visitor);
    visitor.sum_sq.sqrt()
}

/// Scale `grads` in place so their global norm is at most `max_norm`.
///
/// Returns the norm measured before clipping.
pub fn clip_by_global_norm<B, M>(model: &M, grads: &mut GradientsParams, max_norm: f64) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let norm = global_norm::<B, M>(model, grads);
    if max_norm <= 0.0 || norm <= max_norm {
        return norm;
    }
    let scale = max_norm / norm.max(max_norm);
    tracing::trace!("clipping gradients: norm {:.4} → {:.4}", norm, max_norm);
    let mut visitor = Rescale::<B> { grads, scale, _b: PhantomData };
    model.visit(&mut visitor);
    norm
}
