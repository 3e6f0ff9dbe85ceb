//! Cooperative task scheduler.
//!
//! Single-threaded, dispatch-on-poll: the main loop calls
//! [`Scheduler::due_tasks`] with the monotonic clock, executes whatever
//! comes back, and feeds the watchdog. `last_run_ms` is stamped *before* a
//! task is handed out, so a long-running task cannot pile up catch-up
//! dispatches of itself.
//!
//! Intervals are refreshed from the runtime config only at the top of each
//! dispatch iteration — a task never observes an interval change while it
//! is executing.

use log::info;

/// The four gateway tasks, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskId {
    ReadRegisters,
    UploadData,
    WriteRegister,
    CommandResult,
}

pub const TASK_COUNT: usize = 4;

#[derive(Debug, Clone, Copy)]
struct TaskEntry {
    id: TaskId,
    interval_ms: u32,
    last_run_ms: u64,
    enabled: bool,
}

pub struct Scheduler {
    tasks: [TaskEntry; TASK_COUNT],
}

impl Scheduler {
    pub fn new(read_interval_ms: u32, upload_interval_ms: u32) -> Self {
        Self {
            tasks: [
                TaskEntry {
                    id: TaskId::ReadRegisters,
                    interval_ms: read_interval_ms,
                    last_run_ms: 0,
                    enabled: true,
                },
                TaskEntry {
                    id: TaskId::UploadData,
                    interval_ms: upload_interval_ms,
                    last_run_ms: 0,
                    enabled: true,
                },
                TaskEntry {
                    id: TaskId::WriteRegister,
                    interval_ms: upload_interval_ms / 2,
                    last_run_ms: 0,
                    enabled: false,
                },
                // Result reporting piggy-backs on the upload cadence.
                TaskEntry {
                    id: TaskId::CommandResult,
                    interval_ms: upload_interval_ms,
                    last_run_ms: 0,
                    enabled: false,
                },
            ],
        }
    }

    /// Stamp every task as having just run; call once at boot so nothing
    /// fires before its first full interval.
    pub fn init_last_run(&mut self, now_ms: u64) {
        for task in &mut self.tasks {
            task.last_run_ms = now_ms;
        }
    }

    /// Refresh intervals from the active configuration. The write and
    /// command tasks stay coupled to the upload interval.
    pub fn set_intervals(&mut self, read_interval_ms: u32, upload_interval_ms: u32) {
        self.tasks[0].interval_ms = read_interval_ms;
        self.tasks[1].interval_ms = upload_interval_ms;
        self.tasks[2].interval_ms = upload_interval_ms / 2;
        self.tasks[3].interval_ms = upload_interval_ms;
    }

    pub fn set_enabled(&mut self, id: TaskId, enabled: bool) {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
            if task.enabled != enabled {
                info!("Scheduler: {:?} {}", id, if enabled { "enabled" } else { "disabled" });
            }
            task.enabled = enabled;
        }
    }

    pub fn is_enabled(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|t| t.id == id && t.enabled)
    }

    /// Collect every enabled task whose interval has elapsed, stamping
    /// `last_run_ms := now` for each before it is returned.
    pub fn due_tasks(&mut self, now_ms: u64) -> heapless::Vec<TaskId, TASK_COUNT> {
        let mut due = heapless::Vec::new();
        for task in &mut self.tasks {
            if !task.enabled {
                continue;
            }
            if now_ms.saturating_sub(task.last_run_ms) >= u64::from(task.interval_ms) {
                task.last_run_ms = now_ms;
                // Capacity equals the task count, so this cannot fail.
                let _ = due.push(task.id);
            }
        }
        due
    }

    /// Milliseconds until the next enabled task is due; `None` when
    /// something is due right now. Used for the light-sleep slack window.
    pub fn next_due_in(&self, now_ms: u64) -> Option<u64> {
        self.tasks
            .iter()
            .filter(|t| t.enabled)
            .map(|t| {
                let elapsed = now_ms.saturating_sub(t.last_run_ms);
                u64::from(t.interval_ms).saturating_sub(elapsed)
            })
            .min()
            .filter(|slack| *slack > 0)
    }
}
