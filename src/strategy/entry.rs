use super::EntryRule;

/// Enters whenever the book is flat
#[derive(Debug, Clone, Default)]
pub struct AlwaysEntry;

impl EntryRule for AlwaysEntry {
    fn should_enter(&self, _price: f64, _reference_price: Option<f64>) -> bool {
        true
    }

    fn name(&self) -> &str {
        "always"
    }
}

/// Buys the dip
///
/// Enters once price has fallen at least `dip_pct` percent below the
/// reference price. Without a reference there is nothing to measure against,
/// so it waits.
#[derive(Debug, Clone)]
pub struct DipEntry {
    dip_pct: f64,
}

impl DipEntry {
    pub fn new(dip_pct: f64) -> Self {
        Self { dip_pct }
    }

    pub fn dip_pct(&self) -> f64 {
        self.dip_pct
    }
}

impl EntryRule for DipEntry {
    fn should_enter(&self, price: f64, reference_price: Option<f64>) -> bool {
        match reference_price {
            Some(reference) if reference > 0.0 => {
                let drop_pct = (reference - price) / reference * 100.0;
                drop_pct >= self.dip_pct
            }
            _ => false,
        }
    }

    fn name(&self) -> &str {
        "dip"
    }
}
