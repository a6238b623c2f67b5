//! Command line enums for the relayout driver.
//!
//! Every value can be given as any prefix that determines it uniquely, plus a few short aliases.

use clap::ValueEnum;
use clap::builder::PossibleValue;
use tj_transpose::BackendPreference;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VariantOptions {
    Tile,
    Strided,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BackendOptions {
    Auto,
    Native,
    Emulated,
}

impl From<BackendOptions> for BackendPreference {
    fn from(value: BackendOptions) -> Self {
        match value {
            BackendOptions::Auto => Self::Auto,
            BackendOptions::Native => Self::Native,
            BackendOptions::Emulated => Self::Emulated,
        }
    }
}

/// A [`PossibleValue`] accepting `base`, its prefixes of at least `min_unique` characters, and
/// each alias with its own minimal prefix length.
fn get_aliases(
    base: &'static str,
    min_unique: usize,
    aliases: &[(&'static str, usize)],
) -> PossibleValue {
    PossibleValue::new(base).aliases(
        (min_unique..base.len())
            .map(|i| &base[..i])
            .chain(
                aliases
                    .iter()
                    .flat_map(|&(alias, min)| (min..=alias.len()).map(move |i| &alias[..i])),
            ),
    )
}

impl ValueEnum for VariantOptions {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Tile, Self::Strided]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self {
            Self::Tile => get_aliases("tile", 1, &[("a", 1)]),
            Self::Strided => get_aliases("strided", 1, &[("b", 1), ("first-conv", 1)]),
        })
    }
}

impl ValueEnum for BackendOptions {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Auto, Self::Native, Self::Emulated]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self {
            Self::Auto => get_aliases("auto", 1, &[]),
            Self::Native => get_aliases("native", 1, &[("jit", 1)]),
            Self::Emulated => get_aliases("emulated", 1, &[("software", 1)]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_and_aliases() {
        assert_eq!(VariantOptions::from_str("str", true), Ok(VariantOptions::Strided));
        assert_eq!(VariantOptions::from_str("b", true), Ok(VariantOptions::Strided));
        assert_eq!(VariantOptions::from_str("t", true), Ok(VariantOptions::Tile));
        assert_eq!(BackendOptions::from_str("em", true), Ok(BackendOptions::Emulated));
        assert_eq!(BackendOptions::from_str("soft", true), Ok(BackendOptions::Emulated));
        assert!(BackendOptions::from_str("x", true).is_err());
    }
}
