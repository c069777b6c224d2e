use core::{
    cell::UnsafeCell,
    fmt,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const PUBLISHED: u8 = 2;

/// A cell that is written once during boot and read-only afterwards.
///
/// Unlike a lazily initialized cell, the writer is explicit: [`set`](Self::set)
/// refuses a second value instead of silently returning the first, so a
/// repeated initialization step is detected rather than ignored.
pub struct BootOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for BootOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BootOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Returns the published value, if any.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == PUBLISHED {
            // SAFETY: PUBLISHED guarantees the write is complete and final.
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.state.load(Ordering::Acquire) == PUBLISHED
    }

    /// Publishes `value`.
    ///
    /// # Errors
    /// Returns the value back if the cell was already written (or is being
    /// written by another processor).
    pub fn set(&self, value: T) -> Result<&T, T> {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }

        // SAFETY: WRITING gives this caller exclusive access to the slot.
        let slot = unsafe { &mut *self.value.get() };
        slot.write(value);
        self.state.store(PUBLISHED, Ordering::Release);

        // SAFETY: just written and published.
        Ok(unsafe { (*self.value.get()).assume_init_ref() })
    }

    /// Waits for a concurrent writer, then returns the value.
    ///
    /// Returns `None` immediately if nobody has started writing.
    pub fn wait(&self) -> Option<&T> {
        loop {
            match self.state.load(Ordering::Acquire) {
                EMPTY => return None,
                WRITING => spin_loop(),
                _ => return self.get(),
            }
        }
    }
}

impl<T> Drop for BootOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == PUBLISHED {
            // SAFETY: published values are initialized.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for BootOnceCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(v) => f.debug_tuple("BootOnceCell").field(v).finish(),
            None => f.write_str("BootOnceCell(<empty>)"),
        }
    }
}

// Safety: shared after PUBLISHED; the write is single-writer.
unsafe impl<T: Sync + Send> Sync for BootOnceCell<T> {}
unsafe impl<T: Send> Send for BootOnceCell<T> {}
