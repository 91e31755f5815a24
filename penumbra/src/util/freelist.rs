use std::ops::{Index, IndexMut};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FreelistIndex(pub usize);

/// Slot storage that hands out stable indices and recycles freed ones.
#[derive(Debug)]
pub struct FreelistVec<T> {
    data: Vec<Option<T>>,
    freelist: Vec<usize>,
}

impl<T> FreelistVec<T> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            freelist: Vec::new(),
        }
    }

    pub fn push(&mut self, value: T) -> FreelistIndex {
        if let Some(index) = self.freelist.pop() {
            debug_assert!(self.data[index].is_none());
            self.data[index] = Some(value);
            FreelistIndex(index)
        } else {
            let index = self.data.len();
            self.data.push(Some(value));
            FreelistIndex(index)
        }
    }

    /// Removes the value, returning it if the slot was occupied.
    pub fn remove(&mut self, index: FreelistIndex) -> Option<T> {
        let value = self.data.get_mut(index.0)?.take()?;
        self.freelist.push(index.0);
        Some(value)
    }

    pub fn get(&self, index: FreelistIndex) -> Option<&T> {
        self.data.get(index.0)?.as_ref()
    }

    pub fn get_mut(&mut self, index: FreelistIndex) -> Option<&mut T> {
        self.data.get_mut(index.0)?.as_mut()
    }

    pub fn contains(&self, index: FreelistIndex) -> bool {
        self.get(index).is_some()
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.freelist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (FreelistIndex, &T)> {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(idx, value)| Some((FreelistIndex(idx), value.as_ref()?)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (FreelistIndex, &mut T)> {
        self.data
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, value)| Some((FreelistIndex(idx), value.as_mut()?)))
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.freelist.clear();
    }
}

impl<T> Default for FreelistVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<FreelistIndex> for FreelistVec<T> {
    type Output = T;

    fn index(&self, index: FreelistIndex) -> &Self::Output {
        match self.get(index) {
            Some(value) => value,
            None => panic!("access to vacant freelist slot {}", index.0),
        }
    }
}

impl<T> IndexMut<FreelistIndex> for FreelistVec<T> {
    fn index_mut(&mut self, index: FreelistIndex) -> &mut Self::Output {
        match self.get_mut(index) {
            Some(value) => value,
            None => panic!("access to vacant freelist slot {}", index.0),
        }
    }
}
