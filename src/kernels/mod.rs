use std::fmt::Debug;

use dyn_clone::DynClone;
use num::complex::Complex64;

use crate::tree::value::Domain;

/// Relativistic Breit-Wigner line shapes.
pub mod breit_wigner;
/// Wigner-$`D`$ angular distributions.
pub mod wigner;

/// The largest number of inputs a [`Kernel`] may take.
pub const MAX_KERNEL_ARITY: usize = 8;

/// An opaque, per-event physics computation which can be inserted into a
/// [`FunctionTree`](crate::tree::FunctionTree) with
/// [`NodeKind::Kernel`](crate::tree::NodeKind::Kernel).
///
/// From the perspective of the tree, a kernel is just a function of a fixed number of real
/// inputs. Each input may be a scalar (typically a parameter) or a batch (typically a kinematic
/// variable), and the tree takes care of broadcasting, caching, and parallelizing the loop over
/// events, so [`Kernel::compute`] only ever sees one event's worth of arguments.
///
/// Kernels must be [`Clone`] (via [`DynClone`]) so that trees can be copied, and are
/// (de)serialized through [`typetag`], so implementors should annotate their `impl` block with
/// `#[typetag::serde]`.
#[typetag::serde(tag = "type")]
pub trait Kernel: DynClone + Debug + Send + Sync {
    /// A short display name used when printing the tree.
    fn name(&self) -> String;
    /// The number of inputs this kernel expects (at most [`MAX_KERNEL_ARITY`]).
    fn arity(&self) -> usize;
    /// The domain of the kernel's output. Real kernels have the imaginary part of
    /// [`Kernel::compute`] discarded.
    fn domain(&self) -> Domain {
        Domain::Complex
    }
    /// Evaluate the kernel for a single event. `args` always has exactly [`Kernel::arity`]
    /// entries, in the order the inputs were given to the tree.
    fn compute(&self, args: &[f64]) -> Complex64;
}

dyn_clone::clone_trait_object!(Kernel);
