use anyhow::Result;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::spawner::{AgentRequest, ProcessState, Spawner};

/// In-memory spawner: every spawned agent runs until told otherwise.
pub struct FakeSpawner {
    next_pid: AtomicU32,
    fail_next: AtomicBool,
    states: Mutex<HashMap<u32, ProcessState>>,
    spawned: Mutex<Vec<AgentRequest>>,
    terminated: Mutex<Vec<u32>>,
}

impl Default for FakeSpawner {
    fn default() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            fail_next: AtomicBool::new(false),
            states: Mutex::new(HashMap::new()),
            spawned: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSpawner {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn finish(&self, pid: u32, code: Option<i32>) {
        self.states.lock().unwrap().insert(pid, ProcessState::Exited(code));
    }

    pub fn vanish(&self, pid: u32) {
        self.states.lock().unwrap().insert(pid, ProcessState::Gone);
    }

    pub fn spawned(&self) -> Vec<AgentRequest> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, request: &AgentRequest) -> Result<u32> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("agent binary not found");
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.states.lock().unwrap().insert(pid, ProcessState::Running);
        self.spawned.lock().unwrap().push(request.clone());
        Ok(pid)
    }

    fn state(&self, pid: u32, _token: &str) -> ProcessState {
        self.states
            .lock()
            .unwrap()
            .get(&pid)
            .copied()
            .unwrap_or(ProcessState::Gone)
    }

    fn terminate(&self, pid: u32) -> Result<bool> {
        let mut states = self.states.lock().unwrap();
        if states.get(&pid) != Some(&ProcessState::Running) {
            return Ok(false);
        }
        states.insert(pid, ProcessState::Exited(None));
        self.terminated.lock().unwrap().push(pid);
        Ok(true)
    }
}
