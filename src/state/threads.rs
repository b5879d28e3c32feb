use crate::types::{Message, MessageStatus, Thread};

pub(crate) fn find_mut<'a>(threads: &'a mut [Thread], id: &str) -> Option<&'a mut Thread> {
    threads.iter_mut().find(|t| t.id == id)
}

pub(crate) fn contains(threads: &[Thread], id: &str) -> bool {
    threads.iter().any(|t| t.id == id)
}

/// Replaces the local list with the backend's. Histories that came with the
/// list are merged with local unsent messages; threads the list leaves
/// empty keep what was already loaded.
pub(crate) fn merge_list(local: &mut Vec<Thread>, incoming: Vec<Thread>) {
    let merged = incoming
        .into_iter()
        .map(|mut thread| {
            let Some(known) = local.iter_mut().find(|t| t.id == thread.id) else {
                return thread;
            };
            let local_messages = std::mem::take(&mut known.messages);
            if thread.messages_loaded {
                let server = std::mem::take(&mut thread.messages);
                thread.messages = merge_messages(local_messages, server);
            } else if known.messages_loaded || !local_messages.is_empty() {
                thread.messages = local_messages;
                thread.messages_loaded = known.messages_loaded;
            }
            thread
        })
        .collect();
    *local = merged;
}

/// Keeps the current selection when it still exists, otherwise falls back
/// to the first thread.
pub(crate) fn reconcile_selection(threads: &[Thread], current: Option<&str>) -> Option<String> {
    match current {
        Some(id) if contains(threads, id) => Some(id.to_string()),
        _ => threads.first().map(|t| t.id.clone()),
    }
}

/// Server history first, then local messages the server has not seen yet.
pub(crate) fn merge_messages(local: Vec<Message>, server: Vec<Message>) -> Vec<Message> {
    let unsent: Vec<Message> = local
        .into_iter()
        .filter(|m| m.status != MessageStatus::Sent && !server.iter().any(|s| s.id == m.id))
        .collect();
    let mut merged = server;
    merged.extend(unsent);
    merged
}
