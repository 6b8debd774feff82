//! Active task storage, grouped into buckets of equal sort.
//!
//! Buckets keep ascending sort order. Within a bucket, removal swaps the
//! last live task into the vacated slot, so order inside a bucket is not
//! stable. The walker re-reads `len()` after every task, which keeps it
//! correct across removals and appends made while iterating.

use crate::task::{Residence, TaskHandle};

/// All live tasks with one sort value.
#[derive(Debug)]
pub(crate) struct Bucket {
    sort: i32,
    /// `slots[..live]` are occupied; the tail is spare capacity.
    slots: Vec<Option<TaskHandle>>,
    live: usize,
}

impl Bucket {
    pub(crate) fn new(sort: i32) -> Self {
        Self { sort, slots: Vec::new(), live: 0 }
    }

    pub(crate) fn from_tasks(sort: i32, tasks: Vec<TaskHandle>) -> Self {
        let live = tasks.len();
        Self { sort, slots: tasks.into_iter().map(Some).collect(), live }
    }

    pub(crate) fn sort(&self) -> i32 {
        self.sort
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn get(&self, index: usize) -> Option<&TaskHandle> {
        if index < self.len() {
            self.slots[index].as_ref()
        } else {
            None
        }
    }

    pub(crate) fn push(&mut self, task: TaskHandle) {
        if self.live < self.slots.len() {
            self.slots[self.live] = Some(task);
        } else {
            self.slots.push(Some(task));
        }
        self.live += 1;
    }

    /// Remove the task at `index`, moving the last live task into its place.
    pub(crate) fn swap_remove(&mut self, index: usize) -> Option<TaskHandle> {
        if index >= self.live {
            return None;
        }
        let last = self.live - 1;
        self.slots.swap(index, last);
        self.live = last;
        self.slots[last].take()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &TaskHandle> {
        self.slots[..self.live].iter().flatten()
    }

    /// Empty the bucket, returning its live tasks.
    pub(crate) fn drain(&mut self) -> Vec<TaskHandle> {
        let live = self.live;
        self.live = 0;
        self.slots.drain(..).take(live).flatten().collect()
    }
}

/// Buckets in ascending sort order.
#[derive(Debug, Default)]
pub(crate) struct BucketList {
    buckets: Vec<Bucket>,
}

impl BucketList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a task into the bucket for its sort, creating it if needed.
    pub(crate) fn add(&mut self, task: TaskHandle) {
        task.set_residence(Residence::Active);
        let sort = task.sort();
        match self.buckets.binary_search_by_key(&sort, Bucket::sort) {
            Ok(i) => self.buckets[i].push(task),
            Err(i) => {
                let mut bucket = Bucket::new(sort);
                bucket.push(task);
                self.buckets.insert(i, bucket);
            }
        }
    }

    pub(crate) fn bucket(&self, sort: i32) -> Option<&Bucket> {
        self.buckets
            .binary_search_by_key(&sort, Bucket::sort)
            .ok()
            .map(|i| &self.buckets[i])
    }

    pub(crate) fn bucket_mut(&mut self, sort: i32) -> Option<&mut Bucket> {
        self.buckets
            .binary_search_by_key(&sort, Bucket::sort)
            .ok()
            .map(move |i| &mut self.buckets[i])
    }

    /// Lowest sort strictly greater than `after` that has a bucket.
    ///
    /// Walking by sort value instead of by index keeps the walk stable when
    /// buckets are inserted below the current position mid-frame.
    pub(crate) fn next_sort_after(&self, after: Option<i32>) -> Option<i32> {
        let start = match after {
            None => 0,
            Some(sort) => self.buckets.partition_point(|b| b.sort <= sort),
        };
        self.buckets.get(start).map(Bucket::sort)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    /// Every task held, in walk order.
    pub(crate) fn tasks(&self) -> impl Iterator<Item = &TaskHandle> {
        self.buckets.iter().flat_map(Bucket::iter)
    }

    /// Drop buckets with no live tasks.
    pub(crate) fn prune(&mut self) {
        self.buckets.retain(|b| !b.is_empty());
    }

    /// Empty every bucket, returning the tasks.
    pub(crate) fn drain(&mut self) -> Vec<TaskHandle> {
        self.buckets.drain(..).flat_map(|mut b| b.drain()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskSpec, TaskStatus};

    fn task(name: &str, sort: i32) -> TaskHandle {
        TaskSpec::new(name, |_| TaskStatus::Cont).sort(sort).detached()
    }

    fn names(bucket: &Bucket) -> Vec<String> {
        bucket.iter().map(|t| t.name().to_string()).collect()
    }

    #[test]
    fn buckets_stay_sorted() {
        let mut list = BucketList::new();
        list.add(task("c", 10));
        list.add(task("a", -5));
        list.add(task("b", 0));
        list.add(task("b2", 0));

        let sorts: Vec<i32> = list.iter().map(Bucket::sort).collect();
        assert_eq!(sorts, vec![-5, 0, 10]);
        assert_eq!(list.tasks().count(), 4);
        assert_eq!(list.bucket(0).unwrap().len(), 2);
        assert!(list.tasks().all(|t| t.residence() == Residence::Active));
    }

    #[test]
    fn next_sort_after_walks_by_value() {
        let mut list = BucketList::new();
        list.add(task("a", 1));
        list.add(task("b", 5));
        assert_eq!(list.next_sort_after(None), Some(1));
        assert_eq!(list.next_sort_after(Some(1)), Some(5));

        // a bucket inserted below the cursor is not revisited
        list.add(task("c", -3));
        assert_eq!(list.next_sort_after(Some(1)), Some(5));
        assert_eq!(list.next_sort_after(Some(5)), None);
        // and one inserted above is picked up
        list.add(task("d", 3));
        assert_eq!(list.next_sort_after(Some(1)), Some(3));
    }

    #[test]
    fn swap_remove_moves_last_into_slot() {
        let mut bucket = Bucket::new(0);
        for name in ["a", "b", "c", "d"] {
            bucket.push(task(name, 0));
        }
        let removed = bucket.swap_remove(1).unwrap();
        assert_eq!(removed.name(), "b");
        assert_eq!(names(&bucket), vec!["a", "d", "c"]);

        let removed = bucket.swap_remove(2).unwrap();
        assert_eq!(removed.name(), "c");
        assert_eq!(names(&bucket), vec!["a", "d"]);
        assert!(bucket.swap_remove(2).is_none());
    }

    #[test]
    fn push_reuses_spare_slots() {
        let mut bucket = Bucket::new(0);
        bucket.push(task("a", 0));
        bucket.push(task("b", 0));
        bucket.swap_remove(0);
        bucket.push(task("c", 0));
        assert_eq!(bucket.len(), 2);
        assert_eq!(names(&bucket), vec!["b", "c"]);
    }

    #[test]
    fn drain_returns_only_live() {
        let mut bucket = Bucket::from_tasks(2, vec![task("a", 2), task("b", 2), task("c", 2)]);
        bucket.swap_remove(0);
        let drained = bucket.drain();
        assert_eq!(drained.len(), 2);
        assert!(bucket.is_empty());
    }

    #[test]
    fn prune_drops_empty_buckets() {
        let mut list = BucketList::new();
        list.add(task("a", 1));
        list.add(task("b", 2));
        list.bucket_mut(1).unwrap().swap_remove(0);
        list.prune();
        assert!(list.bucket(1).is_none());
        assert_eq!(list.tasks().count(), 1);
    }
}
