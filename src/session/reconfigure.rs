use super::core::SessionCore;
use std::ops::{Deref, DerefMut};
use tracing::trace;

/// An open begin/commit configuration bracket.
///
/// Device, input and connection changes go through this guard. It commits
/// exactly once: explicitly via [`Reconfiguration::commit`] or on drop when
/// an error path leaves early. Starting the stream while it is open fails.
pub(crate) struct Reconfiguration<'a> {
    core: &'a mut SessionCore,
    committed: bool,
}

impl<'a> Reconfiguration<'a> {
    pub fn begin(core: &'a mut SessionCore) -> Self {
        core.configuring = true;
        core.begins += 1;
        trace!("Begin reconfiguration #{}", core.begins);
        Self {
            core,
            committed: false,
        }
    }

    pub fn commit(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.committed {
            return;
        }
        self.committed = true;
        self.core.configuring = false;
        self.core.commits += 1;
        trace!("Commit reconfiguration #{}", self.core.commits);
    }
}

impl Deref for Reconfiguration<'_> {
    type Target = SessionCore;

    fn deref(&self) -> &SessionCore {
        self.core
    }
}

impl DerefMut for Reconfiguration<'_> {
    fn deref_mut(&mut self) -> &mut SessionCore {
        self.core
    }
}

impl Drop for Reconfiguration<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
