use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size<T> {
    pub width: T,
    pub height: T,
}

/// The declared layout of an answer sheet: how many questions it has and how
/// many choices each question offers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SheetShape {
    pub questions: usize,
    pub choices: usize,
}

impl SheetShape {
    pub const fn new(questions: usize, choices: usize) -> Self {
        Self { questions, choices }
    }

    pub fn is_valid(&self) -> bool {
        self.questions > 0 && self.choices > 0 && self.choices <= Choice::MAX_CHOICES
    }
}

impl Default for SheetShape {
    fn default() -> Self {
        Self::new(100, 4)
    }
}

/// A selected answer choice, stored as a zero-based index and presented as a
/// letter (`0 => 'A'`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Choice(u8);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidChoice {
    #[error("choice index {0} is out of range")]
    Index(usize),
    #[error("invalid choice letter: {0:?}")]
    Letter(String),
}

impl Choice {
    pub const MAX_CHOICES: usize = 26;

    pub fn from_index(index: usize) -> Result<Self, InvalidChoice> {
        if index < Self::MAX_CHOICES {
            Ok(Self(index as u8))
        } else {
            Err(InvalidChoice::Index(index))
        }
    }

    pub fn from_letter(letter: char) -> Result<Self, InvalidChoice> {
        let upper = letter.to_ascii_uppercase();
        if upper.is_ascii_uppercase() {
            Ok(Self(upper as u8 - b'A'))
        } else {
            Err(InvalidChoice::Letter(letter.to_string()))
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn letter(self) -> char {
        (b'A' + self.0) as char
    }
}

impl Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl TryFrom<&str> for Choice {
    type Error = InvalidChoice;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) => Self::from_letter(letter),
            _ => Err(InvalidChoice::Letter(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for Choice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Choice::try_from(s.as_str()).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Choice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_char(self.letter())
    }
}

// Defines a new type that wraps a String for use as an ID.
macro_rules! idtype {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            #[allow(dead_code)]
            pub fn from(s: String) -> Self {
                Self(s)
            }

            #[allow(dead_code)]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

pub(crate) use idtype;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_choice_letters() {
        assert_eq!(Choice::from_index(0).unwrap().letter(), 'A');
        assert_eq!(Choice::from_index(3).unwrap().letter(), 'D');
        assert_eq!(Choice::from_letter('c').unwrap().index(), 2);
        assert_eq!(Choice::try_from(" b ").unwrap().index(), 1);
        assert!(Choice::try_from("AB").is_err());
        assert!(Choice::from_letter('7').is_err());
        assert!(Choice::from_index(26).is_err());
    }

    #[test]
    fn test_choice_serde() {
        let choice = Choice::from_letter('B').unwrap();
        let json = serde_json::to_string(&choice).unwrap();
        assert_eq!(json, "\"B\"");
        let parsed: Choice = serde_json::from_str("\"d\"").unwrap();
        assert_eq!(parsed.index(), 3);
        assert!(serde_json::from_str::<Choice>("\"?\"").is_err());
    }

    #[test]
    fn test_sheet_shape_validity() {
        assert!(SheetShape::new(100, 4).is_valid());
        assert!(!SheetShape::new(0, 4).is_valid());
        assert!(!SheetShape::new(10, 0).is_valid());
        assert!(!SheetShape::new(10, 27).is_valid());
    }
}
