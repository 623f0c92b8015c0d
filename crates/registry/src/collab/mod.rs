//! External collaborators the registry consumes through traits.

mod reflect;
mod walker;

pub use reflect::{
    DeclarationReflector, ReflectionFailure, TypeCandidate, TypeDescriptor, TypeReflector,
};
pub use walker::{FileWalker, WalkEntry, WalkdirWalker};

use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Collaborators {
    pub walker: Arc<dyn FileWalker>,
    pub reflector: Arc<dyn TypeReflector>,
}

impl Collaborators {
    pub fn new(walker: Arc<dyn FileWalker>, reflector: Arc<dyn TypeReflector>) -> Self {
        Self { walker, reflector }
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::new(Arc::new(WalkdirWalker), Arc::new(DeclarationReflector))
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
