//! 线程安全双端队列
//!
//! 所有操作共享一把锁；每次入队都会通知条件变量，
//! 阻塞在 `wait_until_non_empty` 的消费者能够及时醒来。

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// 线程安全队列
pub struct TsQueue<T> {
    queue: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> TsQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    pub fn front(&self) -> Option<T>
    where
        T: Clone,
    {
        self.queue.lock().front().cloned()
    }

    pub fn back(&self) -> Option<T>
    where
        T: Clone,
    {
        self.queue.lock().back().cloned()
    }

    pub fn push_front(&self, item: T) {
        self.queue.lock().push_front(item);
        self.not_empty.notify_one();
    }

    pub fn push_back(&self, item: T) {
        self.queue.lock().push_back(item);
        self.not_empty.notify_one();
    }

    /// 入队并返回入队前队列是否为空（同一次加锁内完成）
    pub fn push_back_was_empty(&self, item: T) -> bool {
        let was_empty = {
            let mut queue = self.queue.lock();
            let was_empty = queue.is_empty();
            queue.push_back(item);
            was_empty
        };
        self.not_empty.notify_one();
        was_empty
    }

    pub fn pop_front(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    pub fn pop_back(&self) -> Option<T> {
        self.queue.lock().pop_back()
    }

    /// 丢弃队首并返回队列是否还有剩余（同一次加锁内完成）
    pub fn advance_front(&self) -> bool {
        let mut queue = self.queue.lock();
        queue.pop_front();
        !queue.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    /// 阻塞直到队列非空
    pub fn wait_until_non_empty(&self) {
        let mut queue = self.queue.lock();
        while queue.is_empty() {
            self.not_empty.wait(&mut queue);
        }
    }

    /// 最多阻塞 `timeout`，返回队列是否非空
    pub fn wait_until_non_empty_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        while queue.is_empty() {
            if self.not_empty.wait_until(&mut queue, deadline).timed_out() {
                return !queue.is_empty();
            }
        }
        true
    }
}

impl<T> Default for TsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
