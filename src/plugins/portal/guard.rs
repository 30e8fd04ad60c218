use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Flag telling a portal to ignore new overlaps while clones are being spawned next to it. A
/// freshly spawned clone sits inside the linked portal's trigger volume and must not register
/// itself as an overlapping actor.
#[derive(Debug, Clone, Default)]
pub struct RegistrationLock(Arc<AtomicBool>);

impl RegistrationLock {
    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Holds every lock it was built from until dropped, including on early returns.
#[derive(Debug)]
#[must_use = "the locks are released as soon as the guard is dropped"]
pub struct RegistrationGuard {
    locks: Vec<RegistrationLock>,
}

impl RegistrationGuard {
    /// `None` if any of the locks is already held.
    pub fn acquire<'a, I>(locks: I) -> Option<RegistrationGuard>
    where
        I: IntoIterator<Item = &'a RegistrationLock>,
    {
        let locks: Vec<_> = locks.into_iter().cloned().collect();
        if locks.iter().any(RegistrationLock::is_held) {
            return None;
        }
        for lock in &locks {
            lock.0.store(true, Ordering::Relaxed);
        }
        Some(RegistrationGuard { locks })
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        for lock in &self.locks {
            lock.0.store(false, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_holds_until_dropped() {
        let a = RegistrationLock::default();
        let b = RegistrationLock::default();
        {
            let _guard = RegistrationGuard::acquire([&a, &b]).unwrap();
            assert!(a.is_held() && b.is_held());
            assert!(RegistrationGuard::acquire([&a]).is_none());
        }
        assert!(!a.is_held() && !b.is_held());
    }

    #[test]
    fn guard_is_released_on_early_return() {
        fn bail_out(lock: &RegistrationLock) -> Option<()> {
            let _guard = RegistrationGuard::acquire([lock])?;
            None?;
            Some(())
        }
        let lock = RegistrationLock::default();
        assert!(bail_out(&lock).is_none());
        assert!(!lock.is_held());
    }
}
