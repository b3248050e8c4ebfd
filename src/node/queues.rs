//! Named, bounded token queues.
//!
//! Each queue holds at most `capacity` tokens. An enqueue request deposits
//! one token into each of its queues at once, and waits while any of them is
//! full. A dequeue-many request waits until enough tokens arrived in its
//! queue. Waiting requests are kept in FIFO order per queue and are handed
//! back to the caller once they complete, so the table itself never blocks.
use std::{
    collections::{HashMap, VecDeque},
    error::Error,
    fmt,
};

/// Error raised when a request can never be satisfied by a queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueError {
    /// The queue already exists under this name with another capacity.
    CapacityMismatch {
        queue: String,
        existing: usize,
        requested: usize,
    },
    /// More tokens were requested than the queue can ever hold.
    CountExceedsCapacity {
        queue: String,
        count: usize,
        capacity: usize,
    },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueueError::CapacityMismatch {
                queue,
                existing,
                requested,
            } => write!(
                f,
                "queue {} exists with capacity {}, but capacity {} was requested",
                queue, existing, requested
            ),
            QueueError::CountExceedsCapacity {
                queue,
                count,
                capacity,
            } => write!(
                f,
                "cannot dequeue {} tokens from queue {} of capacity {}",
                count, queue, capacity
            ),
        }
    }
}

impl Error for QueueError {}

/// Identifies a request inside the table.
type Ticket = u64;

struct TokenQueue {
    capacity: usize,
    tokens: usize,
    pending_enqueues: VecDeque<Ticket>,
    pending_dequeues: VecDeque<(Ticket, usize)>,
}

impl TokenQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tokens: 0,
            pending_enqueues: VecDeque::new(),
            pending_dequeues: VecDeque::new(),
        }
    }

    fn has_room(&self) -> bool {
        self.tokens < self.capacity
    }

    fn withdraw(&mut self, ticket: Ticket) {
        self.pending_enqueues.retain(|t| *t != ticket);
        self.pending_dequeues.retain(|(t, _)| *t != ticket);
    }
}

struct Request<W> {
    waiter: W,
    queues: Vec<String>,
}

/// A set of token queues addressed by name.
///
/// The first request naming a queue creates it; later requests attach to it
/// and must agree on its capacity. `W` identifies a waiting request.
pub(crate) struct QueueTable<W> {
    queues: HashMap<String, TokenQueue>,
    requests: HashMap<Ticket, Request<W>>,
    next_ticket: Ticket,
}

impl<W> QueueTable<W> {
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
            requests: HashMap::new(),
            next_ticket: 0,
        }
    }

    /// Checks that `queue` is absent or has `capacity`, without creating it.
    fn check_capacity(&self, queue: &str, capacity: usize) -> Result<(), QueueError> {
        match self.queues.get(queue) {
            Some(existing) if existing.capacity != capacity => Err(QueueError::CapacityMismatch {
                queue: queue.to_string(),
                existing: existing.capacity,
                requested: capacity,
            }),
            _ => Ok(()),
        }
    }

    fn attach(&mut self, queue: &str, capacity: usize) -> &mut TokenQueue {
        self.queues
            .entry(queue.to_string())
            .or_insert_with(|| TokenQueue::new(capacity))
    }

    fn register(&mut self, waiter: W, queues: Vec<String>) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.requests.insert(ticket, Request { waiter, queues });
        ticket
    }

    /// Requests one token to be deposited into `queue`.
    ///
    /// Returns the requests (possibly including `waiter`) that completed as a result.
    pub fn enqueue(&mut self, queue: &str, capacity: usize, waiter: W) -> Result<Vec<W>, QueueError> {
        self.enqueue_all(&[queue.to_string()], capacity, waiter)
    }

    /// Requests one token to be deposited into each of `queues`.
    ///
    /// The tokens are deposited together once every queue has room, so the
    /// request never leaves a token behind in some of its queues. A capacity
    /// mismatch on any queue rejects the request before any queue is touched.
    pub fn enqueue_all(
        &mut self,
        queues: &[String],
        capacity: usize,
        waiter: W,
    ) -> Result<Vec<W>, QueueError> {
        for queue in queues {
            self.check_capacity(queue, capacity)?;
        }
        if queues.is_empty() {
            return Ok(vec![waiter]);
        }
        let ticket = self.register(waiter, queues.to_vec());
        for queue in queues {
            self.attach(queue, capacity).pending_enqueues.push_back(ticket);
        }
        Ok(self.settle())
    }

    /// Requests `count` tokens to be taken out of `queue`.
    ///
    /// Returns the requests (possibly including `waiter`) that completed as a result.
    pub fn dequeue_many(
        &mut self,
        queue: &str,
        capacity: usize,
        count: usize,
        waiter: W,
    ) -> Result<Vec<W>, QueueError> {
        if count > capacity {
            return Err(QueueError::CountExceedsCapacity {
                queue: queue.to_string(),
                count,
                capacity,
            });
        }
        self.check_capacity(queue, capacity)?;
        let ticket = self.register(waiter, vec![queue.to_string()]);
        self.attach(queue, capacity)
            .pending_dequeues
            .push_back((ticket, count));
        Ok(self.settle())
    }

    /// Whether the enqueue `ticket` heads every one of its queues and all of them have room.
    fn enqueue_ready(&self, ticket: Ticket) -> bool {
        let request = match self.requests.get(&ticket) {
            Some(request) => request,
            None => return false,
        };
        request.queues.iter().all(|name| {
            self.queues.get(name).map_or(false, |queue| {
                queue.has_room() && queue.pending_enqueues.front() == Some(&ticket)
            })
        })
    }

    fn resolve(&mut self, ticket: Ticket, completed: &mut Vec<W>) {
        if let Some(request) = self.requests.remove(&ticket) {
            completed.push(request.waiter);
        }
    }

    /// Completes as many waiting requests as possible, in arrival order per queue.
    fn settle(&mut self) -> Vec<W> {
        let mut completed = Vec::new();
        loop {
            let mut progressed = false;

            let heads: Vec<Ticket> = self
                .queues
                .values()
                .filter_map(|queue| queue.pending_enqueues.front().copied())
                .collect();
            for ticket in heads {
                if !self.enqueue_ready(ticket) {
                    continue;
                }
                let names = self
                    .requests
                    .get(&ticket)
                    .map(|request| request.queues.clone())
                    .unwrap_or_default();
                for name in &names {
                    if let Some(queue) = self.queues.get_mut(name) {
                        queue.pending_enqueues.pop_front();
                        queue.tokens += 1;
                    }
                }
                self.resolve(ticket, &mut completed);
                progressed = true;
            }

            let mut drained = Vec::new();
            for queue in self.queues.values_mut() {
                let ready = matches!(queue.pending_dequeues.front(), Some((_, count)) if *count <= queue.tokens);
                if ready {
                    if let Some((ticket, count)) = queue.pending_dequeues.pop_front() {
                        queue.tokens -= count;
                        drained.push(ticket);
                    }
                }
            }
            for ticket in drained {
                self.resolve(ticket, &mut completed);
                progressed = true;
            }

            if !progressed {
                return completed;
            }
        }
    }

    fn withdraw(&mut self, ticket: Ticket) -> Option<W> {
        let request = self.requests.remove(&ticket)?;
        for name in &request.queues {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.withdraw(ticket);
            }
        }
        Some(request.waiter)
    }

    /// Withdraws the waiting request matching `predicate`.
    ///
    /// Returns `None` if no such request is waiting anymore, e.g. because it
    /// completed already. A withdrawn request never deposits or consumes tokens.
    /// Otherwise returns the withdrawn request together with the requests that
    /// completed because it no longer blocks them.
    pub fn cancel<F>(&mut self, mut predicate: F) -> Option<(W, Vec<W>)>
    where
        F: FnMut(&W) -> bool,
    {
        let ticket = self
            .requests
            .iter()
            .find(|(_, request)| predicate(&request.waiter))
            .map(|(ticket, _)| *ticket)?;
        let waiter = self.withdraw(ticket)?;
        Some((waiter, self.settle()))
    }

    /// Withdraws every waiting request matching `predicate` across all queues.
    ///
    /// Returns the requests that completed because blocked requests ahead of them were removed.
    pub fn cancel_all<F>(&mut self, mut predicate: F) -> Vec<W>
    where
        F: FnMut(&W) -> bool,
    {
        let tickets: Vec<Ticket> = self
            .requests
            .iter()
            .filter(|(_, request)| predicate(&request.waiter))
            .map(|(ticket, _)| *ticket)
            .collect();
        for ticket in tickets {
            self.withdraw(ticket);
        }
        self.settle()
    }

    /// The number of tokens currently held by `queue`.
    pub fn len(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(|q| q.tokens)
    }

    /// The number of requests still waiting.
    pub fn pending(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn names(queues: &[&str]) -> Vec<String> {
        queues.iter().map(|q| q.to_string()).collect()
    }

    /// A dequeue of N tokens completes only once the Nth token arrived.
    #[test]
    fn test_dequeue_waits_for_all_tokens() {
        let mut table = QueueTable::new();
        assert_eq!(table.dequeue_many("b_0", 3, 3, "join").unwrap(), Vec::<&str>::new());
        assert_eq!(table.enqueue("b_0", 3, "s0").unwrap(), vec!["s0"]);
        assert_eq!(table.enqueue("b_0", 3, "s1").unwrap(), vec!["s1"]);
        assert_eq!(table.len("b_0"), Some(2));
        assert_eq!(
            table.enqueue("b_0", 3, "s2").unwrap(),
            vec!["s2", "join"],
            "The last token should release the waiting dequeue."
        );
        assert_eq!(table.len("b_0"), Some(0));
        assert_eq!(table.pending(), 0);
    }

    /// Enqueues beyond the capacity wait until a dequeue makes room.
    #[test]
    fn test_enqueue_waits_while_full() {
        let mut table = QueueTable::new();
        assert_eq!(table.enqueue("q", 1, 1).unwrap(), vec![1]);
        assert!(table.enqueue("q", 1, 2).unwrap().is_empty());
        assert_eq!(table.dequeue_many("q", 1, 1, 3).unwrap(), vec![3, 2]);
        assert_eq!(table.len("q"), Some(1));
    }

    #[test]
    fn test_attach_requires_same_capacity() {
        let mut table = QueueTable::new();
        table.enqueue("q", 2, ()).unwrap();
        assert_eq!(
            table.enqueue("q", 3, ()).unwrap_err(),
            QueueError::CapacityMismatch {
                queue: "q".to_string(),
                existing: 2,
                requested: 3
            }
        );
        assert!(matches!(
            table.dequeue_many("q", 2, 5, ()),
            Err(QueueError::CountExceedsCapacity { count: 5, .. })
        ));
    }

    /// A rejected multi-queue enqueue touches none of its queues.
    #[test]
    fn test_enqueue_all_rejected_atomically() {
        let mut table = QueueTable::new();
        table.enqueue("b_1", 5, "other").unwrap();
        assert!(matches!(
            table.enqueue_all(&names(&["b_0", "b_1"]), 1, "signal"),
            Err(QueueError::CapacityMismatch { .. })
        ));
        assert_eq!(table.len("b_0"), None, "The first queue should not be created.");
        assert_eq!(table.len("b_1"), Some(1));
        assert_eq!(table.pending(), 0);
    }

    /// A multi-queue enqueue deposits nothing until every queue has room.
    #[test]
    fn test_enqueue_all_waits_for_every_queue() {
        let mut table = QueueTable::new();
        assert_eq!(table.enqueue("b_1", 1, "previous").unwrap(), vec!["previous"]);
        assert!(table
            .enqueue_all(&names(&["b_0", "b_1"]), 1, "signal")
            .unwrap()
            .is_empty());
        assert_eq!(table.len("b_0"), Some(0), "No token should land while b_1 is full.");

        assert_eq!(
            table.dequeue_many("b_1", 1, 1, "drain").unwrap(),
            vec!["drain", "signal"]
        );
        assert_eq!(table.len("b_0"), Some(1));
        assert_eq!(table.len("b_1"), Some(1));
    }

    /// A cancelled dequeue consumes nothing and unblocks the requests queued behind it.
    #[test]
    fn test_cancel_dequeue() {
        let mut table = QueueTable::new();
        table.dequeue_many("q", 3, 3, "big").unwrap();
        table.dequeue_many("q", 3, 1, "small").unwrap();
        assert!(table.enqueue("q", 3, "t0").unwrap() == vec!["t0"]);
        let (cancelled, completed) = table.cancel(|w| *w == "big").unwrap();
        assert_eq!(cancelled, "big");
        assert_eq!(completed, vec!["small"]);
        assert_eq!(table.len("q"), Some(0));
        assert!(table.cancel(|w| *w == "big").is_none());
    }

    /// A cancelled multi-queue enqueue leaves no token in any queue.
    #[test]
    fn test_cancel_enqueue_all() {
        let mut table = QueueTable::new();
        table.enqueue("b_1", 1, "previous").unwrap();
        table.enqueue_all(&names(&["b_0", "b_1"]), 1, "signal").unwrap();
        let (cancelled, completed) = table.cancel(|w| *w == "signal").unwrap();
        assert_eq!(cancelled, "signal");
        assert!(completed.is_empty());
        assert_eq!(table.dequeue_many("b_1", 1, 1, "drain").unwrap(), vec!["drain"]);
        assert_eq!(table.len("b_0"), Some(0));
        assert_eq!(table.len("b_1"), Some(0));
    }

    #[test]
    fn test_cancel_all() {
        let mut table = QueueTable::new();
        table.dequeue_many("a", 2, 2, (1, 0)).unwrap();
        table.enqueue("b", 1, (2, 0)).unwrap();
        table.enqueue("b", 1, (1, 1)).unwrap();
        assert!(table.cancel_all(|(session, _)| *session == 1).is_empty());
        assert_eq!(table.dequeue_many("b", 1, 1, (2, 1)).unwrap(), vec![(2, 1)]);
        assert_eq!(table.len("b"), Some(0), "The cancelled enqueue should not refill the queue.");
    }
}
