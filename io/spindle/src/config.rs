/// Configuration for the event loop and worker pool.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP listen backlog.
    pub backlog: i32,
    /// Maximum number of simultaneously open sessions. Accepted sockets
    /// beyond this are closed immediately without a response.
    pub max_connections: usize,
    /// Maximum number of tasks waiting for a worker. A full queue rejects
    /// dispatch and the session is closed rather than queued.
    pub max_queued_tasks: usize,
    /// Number of worker threads.
    pub worker_threads: usize,
    /// Capacity of the readiness event buffer per poll call.
    pub events_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backlog: 1024,
            max_connections: 4096,
            max_queued_tasks: 1024,
            worker_threads: 4,
            events_capacity: 1024,
        }
    }
}
