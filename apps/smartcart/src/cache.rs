use cart_sdk::{CartLine, CartSnapshot, LineId};
use tracing::warn;

/// The client's believed-current cart.
///
/// Lines keep server order. Local mutations never create a second line for
/// a product name; a refresh mirrors the server array as-is. The
/// server-reported item count from the last refresh is kept until a local
/// patch invalidates it.
#[derive(Debug, Clone, Default)]
pub struct CartCache {
    lines: Vec<CartLine>,
    reported_count: Option<u32>,
    next_provisional: i64,
}

/// Copy of the cache lines taken before an optimistic patch.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    lines: Vec<CartLine>,
    reported_count: Option<u32>,
}

impl CartCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn get(&self, id: LineId) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.name == name)
    }

    /// Id of the line carrying `id`, falling back to the line named `name`.
    pub fn locate(&self, id: LineId, name: &str) -> Option<LineId> {
        self.get(id)
            .or_else(|| self.find_by_name(name))
            .map(|line| line.id)
    }

    pub fn total(&self) -> f64 {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    pub fn item_count(&self) -> u32 {
        self.reported_count
            .unwrap_or_else(|| self.lines.iter().map(|line| line.quantity).sum())
    }

    /// Wholesale replace from an authoritative snapshot. Local edits are discarded.
    pub fn replace(&mut self, snapshot: CartSnapshot) {
        for (index, line) in snapshot.cart.iter().enumerate() {
            if snapshot.cart[..index].iter().any(|earlier| earlier.name == line.name) {
                warn!(
                    target = "smartcart::cache",
                    name = %line.name,
                    id = %line.id,
                    "server cart repeats a product name"
                );
            }
        }
        self.lines = snapshot.cart;
        self.reported_count = snapshot.item_count;
    }

    /// Appends a server-detected line unless its name is already present.
    /// Returns whether the line was added.
    pub fn push_detected(&mut self, line: CartLine) -> bool {
        if self.find_by_name(&line.name).is_some() {
            return false;
        }
        self.touch();
        self.lines.push(line);
        true
    }

    pub fn increment(&mut self, id: LineId) -> bool {
        match self.line_mut(id) {
            Some(line) => {
                line.quantity += 1;
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Decrements unless the line is already at quantity one.
    pub fn decrement(&mut self, id: LineId) -> bool {
        match self.line_mut(id) {
            Some(line) if line.quantity > 1 => {
                line.quantity -= 1;
                self.touch();
                true
            }
            _ => false,
        }
    }

    /// Removes the line if present; absent ids are a no-op.
    pub fn remove(&mut self, id: LineId) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| line.id != id);
        let removed = self.lines.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.reported_count = Some(0);
    }

    /// Adds one unit of `name`: bumps the existing line, or appends a new line
    /// under a provisional id. Returns the id of the affected line.
    pub fn add_by_name(&mut self, name: &str, price: f64, description: &str) -> LineId {
        self.touch();
        if let Some(line) = self.lines.iter_mut().find(|line| line.name == name) {
            line.quantity += 1;
            return line.id;
        }
        let id = self.mint_provisional();
        self.lines.push(CartLine {
            id,
            name: name.to_string(),
            price,
            description: description.to_string(),
            quantity: 1,
        });
        id
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            lines: self.lines.clone(),
            reported_count: self.reported_count,
        }
    }

    pub fn restore(&mut self, snapshot: CacheSnapshot) {
        self.lines = snapshot.lines;
        self.reported_count = snapshot.reported_count;
    }

    fn mint_provisional(&mut self) -> LineId {
        self.next_provisional -= 1;
        LineId(self.next_provisional)
    }

    fn line_mut(&mut self, id: LineId) -> Option<&mut CartLine> {
        self.lines.iter_mut().find(|line| line.id == id)
    }

    fn touch(&mut self) {
        self.reported_count = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: i64, name: &str, price: f64, quantity: u32) -> CartLine {
        CartLine {
            id: LineId(id),
            name: name.to_string(),
            price,
            description: String::new(),
            quantity,
        }
    }

    fn cache_with(lines: Vec<CartLine>) -> CartCache {
        let mut cache = CartCache::new();
        cache.replace(CartSnapshot {
            cart: lines,
            item_count: None,
            total: None,
        });
        cache
    }

    #[test_timeout::timeout]
    fn quantity_never_drops_below_one() {
        let mut cache = cache_with(vec![line(1, "Milk", 60.0, 2)]);
        let ops = [false, false, false, true, false, false, true, true, false];
        for increment in ops {
            if increment {
                cache.increment(LineId(1));
            } else {
                cache.decrement(LineId(1));
            }
            assert!(cache.get(LineId(1)).unwrap().quantity >= 1);
        }
        assert_eq!(cache.get(LineId(1)).unwrap().quantity, 2);
    }

    #[test_timeout::timeout]
    fn remove_is_idempotent() {
        let mut cache = cache_with(vec![line(1, "Milk", 60.0, 1), line(2, "Bread", 40.0, 1)]);
        assert!(cache.remove(LineId(1)));
        let after_first = cache.snapshot();
        assert!(!cache.remove(LineId(1)));
        assert_eq!(cache.snapshot(), after_first);
        assert_eq!(cache.len(), 1);
    }

    #[test_timeout::timeout]
    fn add_by_name_bumps_existing_line() {
        let mut cache = cache_with(vec![line(4, "Milk", 60.0, 2)]);
        let id = cache.add_by_name("Milk", 60.0, "1L");
        assert_eq!(id, LineId(4));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(LineId(4)).unwrap().quantity, 3);
    }

    #[test_timeout::timeout]
    fn add_by_name_mints_non_colliding_ids() {
        let mut cache = cache_with(vec![line(0, "Milk", 60.0, 1), line(1, "Bread", 40.0, 1)]);
        cache.remove(LineId(0));
        let eggs = cache.add_by_name("Eggs", 75.0, "dozen");
        let jam = cache.add_by_name("Jam", 120.0, "jar");

        assert!(eggs.is_provisional());
        assert!(jam.is_provisional());
        assert_ne!(eggs, jam);
        assert!(cache.get(LineId(1)).is_some());
    }

    #[test_timeout::timeout]
    fn replace_discards_local_state() {
        let mut cache = cache_with(vec![line(1, "Milk", 60.0, 1)]);
        cache.add_by_name("Eggs", 75.0, "dozen");
        cache.replace(CartSnapshot {
            cart: vec![line(9, "Bread", 40.0, 2)],
            item_count: Some(2),
            total: Some(80.0),
        });
        assert_eq!(cache.lines(), &[line(9, "Bread", 40.0, 2)]);
        assert_eq!(cache.item_count(), 2);
    }

    #[test_timeout::timeout]
    fn replace_keeps_repeated_server_names() {
        let server = vec![line(1, "Milk", 60.0, 1), line(2, "Milk", 60.0, 2)];
        let cache = cache_with(server.clone());
        assert_eq!(cache.lines(), server.as_slice());
        assert_eq!(cache.item_count(), 3);
    }

    #[test_timeout::timeout]
    fn detected_duplicates_are_not_pushed() {
        let mut cache = cache_with(vec![line(3, "Milk", 60.0, 2)]);
        assert!(!cache.push_detected(line(7, "Milk", 60.0, 1)));
        assert!(cache.push_detected(line(8, "Bread", 40.0, 1)));
        assert_eq!(cache.len(), 2);
    }

    #[test_timeout::timeout]
    fn totals_follow_lines() {
        let mut cache = cache_with(vec![line(1, "Milk", 60.0, 2), line(2, "Bread", 40.5, 1)]);
        assert_eq!(cache.total(), 160.5);
        assert_eq!(cache.item_count(), 3);
        cache.clear();
        assert_eq!(cache.total(), 0.0);
        assert_eq!(cache.item_count(), 0);
    }

    #[test_timeout::timeout]
    fn restore_returns_to_snapshot() {
        let mut cache = cache_with(vec![line(1, "Milk", 60.0, 2)]);
        let before = cache.snapshot();
        cache.increment(LineId(1));
        cache.add_by_name("Jam", 120.0, "jar");
        cache.restore(before.clone());
        assert_eq!(cache.snapshot(), before);
    }

    #[test_timeout::timeout]
    fn locate_falls_back_to_name() {
        let cache = cache_with(vec![line(3, "Milk", 60.0, 2)]);
        assert_eq!(cache.locate(LineId(7), "Milk"), Some(LineId(3)));
        assert_eq!(cache.locate(LineId(3), "Bread"), Some(LineId(3)));
        assert_eq!(cache.locate(LineId(7), "Bread"), None);
    }
}
