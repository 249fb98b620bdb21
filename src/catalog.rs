/// Named tricks, in class index order.
pub const TRICKS: [&str; 12] = [
    "ollie",
    "nollie",
    "shove-it",
    "pop-shove-it",
    "kickflip",
    "heelflip",
    "180-front",
    "180-back",
    "360-front",
    "360-back",
    "boardslide",
    "50-50",
];

/// Every named trick plus the unknown class.
pub const NUM_CLASSES: usize = TRICKS.len() + 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrickLabel {
    Known(usize),
    Unknown,
}

impl From<&str> for TrickLabel {
    fn from(label: &str) -> Self {
        TRICKS.iter().position(|&trick| trick == label).map_or(Self::Unknown, Self::Known)
    }
}

impl std::fmt::Display for TrickLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TrickLabel {
    /// `0..TRICKS.len()` for named tricks, `TRICKS.len()` for unknown.
    pub fn class_index(self) -> usize {
        match self {
            Self::Known(idx) => idx,
            Self::Unknown => TRICKS.len(),
        }
    }

    pub fn from_class_index(idx: usize) -> Option<Self> {
        match idx {
            _ if idx < TRICKS.len() => Some(Self::Known(idx)),
            _ if idx == TRICKS.len() => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Known(idx) => TRICKS[idx],
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_labels_map_to_fixed_indices() {
        for (idx, trick) in TRICKS.iter().enumerate() {
            let label = TrickLabel::from(*trick);
            assert_eq!(label, TrickLabel::Known(idx));
            assert_eq!(label.class_index(), idx);
            assert_eq!(label.name(), *trick);
        }

        assert_eq!(TrickLabel::from("kickflip").class_index(), 4);
        assert_eq!(TrickLabel::from("50-50").class_index(), 11);
    }

    #[test]
    fn unrecognised_labels_are_unknown() {
        for label in ["", "Kickflip", "tre-flip", "ollie "] {
            assert_eq!(TrickLabel::from(label), TrickLabel::Unknown);
            assert_eq!(TrickLabel::from(label).class_index(), 12);
        }
    }

    #[test]
    fn class_index_round_trip() {
        assert_eq!(NUM_CLASSES, 13);

        for idx in 0..NUM_CLASSES {
            assert_eq!(TrickLabel::from_class_index(idx).map(TrickLabel::class_index), Some(idx));
        }

        assert_eq!(TrickLabel::from_class_index(13), None);
    }
}
