//! One-shot cancellation tokens shared between the interrupt handler, the
//! scheduler and the backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Armed until [`CancellationToken::cancel`] is called; never resets.
///
/// A token may observe parents: it then reports cancelled as soon as itself
/// or any parent is cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    parents: Vec<Arc<AtomicBool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh token that also observes `parent`.
    pub fn linked(parent: &CancellationToken) -> Self {
        Self::new().with_parent(parent)
    }

    /// Same flag as `self`, additionally observing `parent` (and its parents).
    pub fn with_parent(&self, parent: &CancellationToken) -> Self {
        let mut parents = self.parents.clone();
        parents.push(Arc::clone(&parent.flag));
        parents.extend(parent.parents.iter().cloned());
        Self {
            flag: Arc::clone(&self.flag),
            parents,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.parents.iter().any(|p| p.load(Ordering::SeqCst))
    }
}

/// Routes Ctrl-C to `token`. A second Ctrl-C after cancellation exits with 130.
pub fn install_interrupt_handler(token: &CancellationToken) -> crate::SimtestResult<()> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(130);
        }
        eprintln!("interrupt received, cancelling pending tasks (press again to abort)");
        token.cancel();
    })
    .map_err(|e| crate::SimtestError::Config(format!("failed to install interrupt handler: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_one_shot_and_shared_by_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn linked_token_observes_parent_but_not_the_reverse() {
        let parent = CancellationToken::new();
        let child = CancellationToken::linked(&parent);
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = CancellationToken::linked(&parent);
        assert!(!other.is_cancelled());
        parent.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn with_parent_keeps_own_flag() {
        let task = CancellationToken::new();
        let run = CancellationToken::new();
        let linked = task.with_parent(&run);
        task.cancel();
        assert!(linked.is_cancelled());
        assert!(!run.is_cancelled());

        let task2 = CancellationToken::new();
        let linked2 = task2.with_parent(&run);
        assert!(!linked2.is_cancelled());
        run.cancel();
        assert!(linked2.is_cancelled());
        assert!(!task2.is_cancelled());
    }
}
