//! Send queue state machine (C10): a FIFO multi-file queue modeled as a
//! pure reducer over actions, so its rules (at most one `Sending` item,
//! monotonic `revision`) can be tested without any I/O.

/// Lifecycle status of one queued file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendItemStatus {
    Queued,
    Sending,
    Completed,
    Failed,
}

/// One file's position in the send queue.
#[derive(Debug, Clone, PartialEq)]
pub struct SendQueueItem {
    pub id: String,
    pub name: String,
    pub status: SendItemStatus,
    pub sent_bytes: u64,
    pub total_bytes: u64,
    pub attempts: u32,
    pub error_message: Option<String>,
}

impl SendQueueItem {
    /// Progress percent, clamped to `[0, 100]`.
    pub fn progress_percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let pct = (self.sent_bytes.min(self.total_bytes) * 100) / self.total_bytes;
        pct.min(100) as u8
    }
}

/// An action applied to the queue.
#[derive(Debug, Clone)]
pub enum SendQueueAction {
    Enqueue { id: String, name: String, total_bytes: u64 },
    MarkSending { id: String },
    UpdateProgress { id: String, sent_bytes: u64 },
    MarkCompleted { id: String },
    MarkFailed { id: String, error_message: String },
    Retry { id: String },
    Remove { id: String },
    ClearCompleted,
    Reset,
}

/// The queue's state: an ordered list of items plus a monotonic
/// `revision` bumped on any observable change.
#[derive(Debug, Clone, Default)]
pub struct SendQueueState {
    pub items: Vec<SendQueueItem>,
    pub revision: u64,
}

impl SendQueueState {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one action, returning the new state. Pure: the same
    /// `(state, action)` pair always produces the same result, and
    /// actions that are no-ops (e.g. removing an absent id) return an
    /// equivalent state without bumping `revision`.
    pub fn apply(&self, action: SendQueueAction) -> Self {
        match action {
            SendQueueAction::Enqueue { id, name, total_bytes } => {
                let mut items = self.items.clone();
                items.push(SendQueueItem {
                    id,
                    name,
                    status: SendItemStatus::Queued,
                    sent_bytes: 0,
                    total_bytes,
                    attempts: 0,
                    error_message: None,
                });
                self.bump(items)
            }
            SendQueueAction::MarkSending { id } => {
                if !self.items.iter().any(|i| i.id == id) {
                    return self.clone();
                }
                let mut items = self.items.clone();
                for item in items.iter_mut() {
                    if item.id == id {
                        item.status = SendItemStatus::Sending;
                        item.attempts += 1;
                        item.error_message = None;
                    } else if item.status == SendItemStatus::Sending {
                        // Defensive: only one item may be `Sending` at a
                        // time.
                        item.status = SendItemStatus::Queued;
                    }
                }
                self.bump(items)
            }
            SendQueueAction::UpdateProgress { id, sent_bytes } => {
                let mut changed = false;
                let mut items = self.items.clone();
                for item in items.iter_mut() {
                    if item.id == id && item.status == SendItemStatus::Sending {
                        item.sent_bytes = sent_bytes.min(item.total_bytes);
                        changed = true;
                    }
                }
                if changed {
                    self.bump(items)
                } else {
                    self.clone()
                }
            }
            SendQueueAction::MarkCompleted { id } => self.transition_to(&id, SendItemStatus::Completed),
            SendQueueAction::MarkFailed { id, error_message } => {
                if !self.items.iter().any(|i| i.id == id) {
                    return self.clone();
                }
                let mut items = self.items.clone();
                for item in items.iter_mut() {
                    if item.id == id {
                        item.status = SendItemStatus::Failed;
                        item.error_message = Some(error_message.clone());
                    }
                }
                self.bump(items)
            }
            SendQueueAction::Retry { id } => {
                let mut changed = false;
                let mut items = self.items.clone();
                for item in items.iter_mut() {
                    if item.id == id && item.status == SendItemStatus::Failed {
                        item.status = SendItemStatus::Queued;
                        item.error_message = None;
                        changed = true;
                    }
                }
                if changed {
                    self.bump(items)
                } else {
                    self.clone()
                }
            }
            SendQueueAction::Remove { id } => {
                let target_is_sending = self
                    .items
                    .iter()
                    .any(|i| i.id == id && i.status == SendItemStatus::Sending);
                if target_is_sending {
                    // Refuses to remove a `Sending` item.
                    return self.clone();
                }
                let before = self.items.len();
                let items: Vec<_> = self.items.iter().filter(|i| i.id != id).cloned().collect();
                if items.len() == before {
                    self.clone()
                } else {
                    self.bump(items)
                }
            }
            SendQueueAction::ClearCompleted => {
                let before = self.items.len();
                let items: Vec<_> = self
                    .items
                    .iter()
                    .filter(|i| i.status != SendItemStatus::Completed)
                    .cloned()
                    .collect();
                if items.len() == before {
                    self.clone()
                } else {
                    self.bump(items)
                }
            }
            SendQueueAction::Reset => {
                if self.items.is_empty() {
                    self.clone()
                } else {
                    self.bump(Vec::new())
                }
            }
        }
    }

    fn transition_to(&self, id: &str, status: SendItemStatus) -> Self {
        if !self.items.iter().any(|i| i.id == id) {
            return self.clone();
        }
        let mut items = self.items.clone();
        for item in items.iter_mut() {
            if item.id == id {
                item.status = status;
                if status == SendItemStatus::Completed {
                    item.sent_bytes = item.total_bytes;
                }
            }
        }
        self.bump(items)
    }

    fn bump(&self, items: Vec<SendQueueItem>) -> Self {
        Self {
            items,
            revision: self.revision + 1,
        }
    }

    /// The id of the currently-sending item, if any.
    pub fn sending_item_id(&self) -> Option<&str> {
        self.items
            .iter()
            .find(|i| i.status == SendItemStatus::Sending)
            .map(|i| i.id.as_str())
    }

    /// Count of items currently `Sending`. Must never exceed 1.
    pub fn sending_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == SendItemStatus::Sending)
            .count()
    }
}
