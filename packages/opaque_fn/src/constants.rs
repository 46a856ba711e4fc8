// A poisoned lock means a descriptor registration panicked midway. The registry can no longer
// promise one canonical descriptor per type, so we refuse to continue (we panic).
pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned descriptor registry lock - \
    canonical descriptor identity can no longer be guaranteed";
