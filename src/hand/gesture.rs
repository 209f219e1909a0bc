//! Finger counting and static gesture recognition.

use std::fmt;

use super::{HandLandmarks, LandmarkIdx};

/// Extension state of the five fingers of a hand, ordered thumb, index, middle, ring, pinky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FingerVector([bool; 5]);

impl FingerVector {
    pub const fn new(extended: [bool; 5]) -> Self {
        Self(extended)
    }

    /// Creates a finger vector from `0`/`1` flags. Any non-zero flag counts as extended.
    pub fn from_flags(flags: [u8; 5]) -> Self {
        Self(flags.map(|flag| flag != 0))
    }

    /// Derives the finger states from the hand's landmarks on a mirrored frame.
    ///
    /// The thumb counts as extended if its tip is left of the IP joint. Each other finger counts as
    /// extended if its tip is above its PIP joint.
    pub fn from_landmarks(hand: &HandLandmarks) -> Self {
        use LandmarkIdx::*;

        let thumb = hand.get(ThumbTip).x() < hand.get(ThumbIp).x();
        let finger = |tip: LandmarkIdx, pip: LandmarkIdx| hand.get(tip).y() < hand.get(pip).y();
        Self([
            thumb,
            finger(IndexFingerTip, IndexFingerPip),
            finger(MiddleFingerTip, MiddleFingerPip),
            finger(RingFingerTip, RingFingerPip),
            finger(PinkyTip, PinkyPip),
        ])
    }

    pub fn extended(&self) -> [bool; 5] {
        self.0
    }

    /// Returns the number of extended fingers.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&extended| extended).count()
    }

    /// Packs the flags into a bitmask, with the thumb in bit 0 and the pinky in bit 4.
    pub fn bits(&self) -> u8 {
        self.0
            .iter()
            .enumerate()
            .fold(0, |bits, (i, &extended)| bits | (u8::from(extended) << i))
    }

    /// Looks up the gesture formed by this finger vector.
    pub fn gesture(&self) -> Gesture {
        GESTURES[usize::from(self.bits())]
    }
}

/// A static hand gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    Peace,
    ThumbsUp,
    Pointing,
    OpenPalm,
    Fist,
    /// Any finger combination without a name of its own.
    Other,
}

impl Gesture {
    pub fn name(self) -> &'static str {
        match self {
            Gesture::Peace => "Peace",
            Gesture::ThumbsUp => "Thumbs Up",
            Gesture::Pointing => "Pointing",
            Gesture::OpenPalm => "Open Palm",
            Gesture::Fist => "Fist",
            Gesture::Other => "Gesture",
        }
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Gesture for every [`FingerVector::bits`] value.
const GESTURES: [Gesture; 32] = {
    let mut table = [Gesture::Other; 32];
    table[0b00110] = Gesture::Peace;
    table[0b00001] = Gesture::ThumbsUp;
    table[0b00010] = Gesture::Pointing;
    table[0b11111] = Gesture::OpenPalm;
    table[0b00000] = Gesture::Fist;
    table
};

#[cfg(test)]
mod tests {
    use super::*;

    fn all_vectors() -> impl Iterator<Item = FingerVector> {
        (0u8..32).map(|bits| FingerVector::new([0, 1, 2, 3, 4].map(|i| bits & (1 << i) != 0)))
    }

    #[test]
    fn named_gestures() {
        let cases = [
            ([0, 1, 1, 0, 0], "Peace"),
            ([1, 0, 0, 0, 0], "Thumbs Up"),
            ([0, 1, 0, 0, 0], "Pointing"),
            ([1, 1, 1, 1, 1], "Open Palm"),
            ([0, 0, 0, 0, 0], "Fist"),
        ];
        for (flags, name) in cases {
            assert_eq!(
                FingerVector::from_flags(flags).gesture().to_string(),
                name,
                "{flags:?}"
            );
        }
    }

    #[test]
    fn every_other_vector_is_generic() {
        let named = [0b00110, 0b00001, 0b00010, 0b11111, 0b00000];
        let mut generic = 0;
        for vector in all_vectors() {
            if named.contains(&vector.bits()) {
                assert_ne!(vector.gesture(), Gesture::Other, "{vector:?}");
            } else {
                assert_eq!(vector.gesture().to_string(), "Gesture", "{vector:?}");
                generic += 1;
            }
        }
        assert_eq!(generic, 27);
    }

    #[test]
    fn count_is_number_of_extended_fingers() {
        assert_eq!(FingerVector::from_flags([1, 1, 0, 0, 0]).count(), 2);
        assert_eq!(FingerVector::from_flags([0, 0, 0, 0, 0]).count(), 0);
        assert_eq!(FingerVector::from_flags([1, 1, 1, 1, 1]).count(), 5);
        for vector in all_vectors() {
            assert_eq!(vector.count() as u32, vector.bits().count_ones());
        }
    }

    #[test]
    fn bits_round_trip_flags() {
        let vector = FingerVector::from_flags([1, 0, 1, 0, 1]);
        assert_eq!(vector.bits(), 0b10101);
        assert_eq!(vector.extended(), [true, false, true, false, true]);
    }
}
