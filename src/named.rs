use std::cell::Cell;
use std::fmt;

/// A thread with a fixed, process-wide identity.
///
/// The set is fixed at compile time. The scheduler never owns the OS threads
/// behind these slots; a thread adopts an identity with
/// [`TaskGraph::attach_to_thread`](crate::TaskGraph::attach_to_thread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedThread {
    #[cfg(feature = "stats")]
    StatsThread,
    GameThread,
    RenderingThread,
}

impl NamedThread {
    pub const ALL: &'static [NamedThread] = &[
        #[cfg(feature = "stats")]
        NamedThread::StatsThread,
        NamedThread::GameThread,
        NamedThread::RenderingThread,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn name(self) -> &'static str {
        match self {
            #[cfg(feature = "stats")]
            NamedThread::StatsThread => "stats",
            NamedThread::GameThread => "game",
            NamedThread::RenderingThread => "rendering",
        }
    }

    pub(crate) fn index(self) -> ThreadIndex {
        ThreadIndex(self as usize)
    }

    pub(crate) fn from_index(index: ThreadIndex) -> Option<Self> {
        Self::ALL.get(index.0).copied()
    }
}

impl fmt::Display for NamedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which of a named thread's queues a task goes to.
///
/// The local queue lets a thread pump a restricted subset of its work (for
/// example while waiting inside a frame) without running everything else
/// that was sent to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueIndex {
    #[default]
    Main,
    Local,
}

impl QueueIndex {
    pub const COUNT: usize = 2;

    pub(crate) fn as_usize(self) -> usize {
        self as usize
    }
}

/// Where a task should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThreadTarget {
    /// Any unnamed worker. With no workers configured this falls back to the
    /// game thread.
    #[default]
    AnyThread,
    Named(NamedThread, QueueIndex),
}

impl ThreadTarget {
    pub const GAME_THREAD: Self = ThreadTarget::Named(NamedThread::GameThread, QueueIndex::Main);
    pub const RENDERING_THREAD: Self = ThreadTarget::Named(NamedThread::RenderingThread, QueueIndex::Main);

    pub fn local(thread: NamedThread) -> Self {
        ThreadTarget::Named(thread, QueueIndex::Local)
    }

    pub fn named_thread(self) -> Option<NamedThread> {
        match self {
            ThreadTarget::AnyThread => None,
            ThreadTarget::Named(thread, _) => Some(thread),
        }
    }
}

impl From<NamedThread> for ThreadTarget {
    fn from(thread: NamedThread) -> Self {
        ThreadTarget::Named(thread, QueueIndex::Main)
    }
}

/// Position of a thread in the scheduler's thread table. Named threads come
/// first, in [`NamedThread::ALL`] order, followed by the unnamed workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ThreadIndex(pub usize);

impl ThreadIndex {
    pub fn is_named(self) -> bool {
        self.0 < NamedThread::COUNT
    }

    /// Public identity of this slot. Workers report themselves as `AnyThread`.
    pub fn target(self) -> ThreadTarget {
        match NamedThread::from_index(self) {
            Some(thread) => thread.into(),
            None => ThreadTarget::AnyThread,
        }
    }
}

thread_local! {
    /// Scheduler generation and slot this OS thread was attached to.
    static CURRENT: Cell<Option<(u64, ThreadIndex)>> = const { Cell::new(None) };
}

pub(crate) fn attach_current(generation: u64, index: ThreadIndex) {
    CURRENT.with(|c| c.set(Some((generation, index))));
}

/// The slot of the calling thread, if it was attached during `generation`.
/// Attachments from an earlier startup are ignored.
pub(crate) fn current_index(generation: u64) -> Option<ThreadIndex> {
    match CURRENT.with(Cell::get) {
        Some((g, index)) if g == generation => Some(index),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_indices_are_dense() {
        for (i, thread) in NamedThread::ALL.iter().enumerate() {
            assert_eq!(thread.index(), ThreadIndex(i));
            assert_eq!(NamedThread::from_index(ThreadIndex(i)), Some(*thread));
        }
        assert_eq!(NamedThread::from_index(ThreadIndex(NamedThread::COUNT)), None);
    }

    #[test]
    fn test_worker_slots_are_any_thread() {
        assert_eq!(ThreadIndex(NamedThread::COUNT).target(), ThreadTarget::AnyThread);
        assert_eq!(NamedThread::GameThread.index().target(), ThreadTarget::GAME_THREAD);
    }

    #[test]
    fn test_stale_generation_is_unknown() {
        std::thread::spawn(|| {
            assert_eq!(current_index(1), None);
            attach_current(1, ThreadIndex(0));
            assert_eq!(current_index(1), Some(ThreadIndex(0)));
            assert_eq!(current_index(2), None);
        })
        .join()
        .unwrap();
    }
}
