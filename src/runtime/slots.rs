//! 协程槽位表
//!
//! 以 ID 为下标的协程表。槽位为空表示协程已死亡；
//! 只有在槽位被清空后，它的 ID 才可能分配给新协程

use super::coroutine::Coroutine;
use super::error::{CoroutineError, Result};
use super::CoroutineId;

/// 协程槽位表
pub struct SlotTable {
    /// 槽位，`None` 为空
    slots: Vec<Option<Box<Coroutine>>>,
    /// 已占用的槽位数
    live: usize,
}

impl SlotTable {
    /// 创建指定容量的空表
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity.max(1), || None);
        Self { slots, live: 0 }
    }

    /// 槽位总数（合法 ID 的上界）
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 已占用的槽位数
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// 检查 ID 是否在合法范围内
    #[inline]
    pub fn check(&self, id: CoroutineId) -> Result<()> {
        if id >= self.capacity() {
            return Err(CoroutineError::OutOfRange { id, capacity: self.capacity() });
        }
        Ok(())
    }

    /// 放入协程，返回分配到的 ID
    ///
    /// 表满时容量翻倍，协程放在扩容出的第一个槽位；
    /// 否则从 `live % capacity` 开始环形查找第一个空槽位
    pub fn insert(&mut self, co: Box<Coroutine>) -> CoroutineId {
        let cap = self.capacity();

        if self.live >= cap {
            self.slots.resize_with(cap * 2, || None);
            self.slots[cap] = Some(co);
            self.live += 1;
            log::debug!("coroutine table grown {} -> {}", cap, cap * 2);
            return cap;
        }

        let start = self.live % cap;
        let id = (0..cap)
            .map(|i| (start + i) % cap)
            .find(|&id| self.slots[id].is_none())
            .unwrap_or_else(|| {
                unreachable!("live count {} below capacity {} but no empty slot", self.live, cap)
            });

        self.slots[id] = Some(co);
        self.live += 1;
        id
    }

    /// 获取协程
    #[inline]
    pub fn get(&self, id: CoroutineId) -> Option<&Coroutine> {
        self.slots.get(id)?.as_deref()
    }

    /// 获取可变协程
    #[inline]
    pub fn get_mut(&mut self, id: CoroutineId) -> Option<&mut Coroutine> {
        self.slots.get_mut(id)?.as_deref_mut()
    }

    /// 清空槽位，取出协程
    pub fn remove(&mut self, id: CoroutineId) -> Option<Box<Coroutine>> {
        let co = self.slots.get_mut(id)?.take()?;
        self.live -= 1;
        Some(co)
    }

    /// 遍历所有存活协程
    pub fn iter(&self) -> impl Iterator<Item = (CoroutineId, &Coroutine)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_deref().map(|co| (id, co)))
    }

    /// 销毁所有协程，返回销毁的数量
    pub fn clear(&mut self) -> usize {
        let dropped = self.live;
        for slot in self.slots.iter_mut() {
            slot.take();
        }
        self.live = 0;
        dropped
    }
}

impl std::fmt::Debug for SlotTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotTable")
            .field("capacity", &self.capacity())
            .field("live", &self.live)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_coroutine() -> Box<Coroutine> {
        Box::new(Coroutine::new(Box::new(|_| {})))
    }

    #[test]
    fn test_insert_sequential() {
        let mut table = SlotTable::with_capacity(4);
        for expected in 0..4 {
            assert_eq!(table.insert(make_test_coroutine()), expected);
        }
        assert_eq!(table.live_count(), 4);
        assert_eq!(table.capacity(), 4);
    }

    #[test]
    fn test_insert_doubles_when_full() {
        let mut table = SlotTable::with_capacity(16);
        let ids: Vec<_> = (0..20).map(|_| table.insert(make_test_coroutine())).collect();

        assert_eq!(table.capacity(), 32);
        assert_eq!(ids, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_probe_starts_at_live_count() {
        let mut table = SlotTable::with_capacity(4);
        for _ in 0..3 {
            table.insert(make_test_coroutine());
        }
        table.remove(0);
        table.remove(1);
        // live = 1，从槽位 1 开始查找
        assert_eq!(table.insert(make_test_coroutine()), 1);
        // live = 2，槽位 2 被占用，3 为空
        assert_eq!(table.insert(make_test_coroutine()), 3);
        // live = 3，槽位 3 被占用，环绕到 0
        assert_eq!(table.insert(make_test_coroutine()), 0);
    }

    #[test]
    fn test_remove_frees_slot() {
        let mut table = SlotTable::with_capacity(2);
        let id = table.insert(make_test_coroutine());

        assert!(table.get(id).is_some());
        assert!(table.remove(id).is_some());
        assert!(table.get(id).is_none());
        assert!(table.remove(id).is_none());
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn test_check_range() {
        let table = SlotTable::with_capacity(16);
        assert!(table.check(15).is_ok());
        assert!(matches!(
            table.check(16),
            Err(CoroutineError::OutOfRange { id: 16, capacity: 16 })
        ));
    }

    #[test]
    fn test_clear() {
        let mut table = SlotTable::with_capacity(4);
        for _ in 0..3 {
            table.insert(make_test_coroutine());
        }
        assert_eq!(table.clear(), 3);
        assert_eq!(table.live_count(), 0);
        assert_eq!(table.iter().count(), 0);
    }
}
