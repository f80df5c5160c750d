use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A remote (or local) GeoJSON file describing the tiles of a basemap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseMapSource {
    pub url: String,
}
impl BaseMapSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// The survey project whose basemap is being taken offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// In order of preference.
    #[serde(default)]
    pub basemap_sources: Vec<BaseMapSource>,
}

/// Which of a project's basemap sources get fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceSelection {
    /// Only the first declared source; the rest are ignored.
    #[default]
    FirstOnly,
    /// Every declared source, in order. Tiles are the union across all of them.
    All,
}
impl SourceSelection {
    /// The sources to fetch, in order.
    pub fn select<'a>(&self, sources: &'a [BaseMapSource]) -> &'a [BaseMapSource] {
        match self {
            Self::FirstOnly => &sources[..sources.len().min(1)],
            Self::All => sources,
        }
    }
}
impl fmt::Display for SourceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FirstOnly => "first-only",
            Self::All => "all",
        })
    }
}

/// Returned when parsing an unknown [`SourceSelection`].
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("unknown source selection, expected `first-only` or `all`")]
pub struct UnknownSourceSelection;

impl FromStr for SourceSelection {
    type Err = UnknownSourceSelection;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-only" => Ok(Self::FirstOnly),
            "all" => Ok(Self::All),
            _ => Err(UnknownSourceSelection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sources(n: usize) -> Vec<BaseMapSource> {
        (0..n).map(|i| BaseMapSource::new(format!("https://maps.example.com/{i}.geojson"))).collect()
    }

    #[rstest]
    #[case(SourceSelection::FirstOnly, 0, 0)]
    #[case(SourceSelection::FirstOnly, 3, 1)]
    #[case(SourceSelection::All, 0, 0)]
    #[case(SourceSelection::All, 3, 3)]
    fn test_select(#[case] selection: SourceSelection, #[case] available: usize, #[case] selected: usize) {
        let sources = sources(available);
        let chosen = selection.select(&sources);
        assert_eq!(chosen.len(), selected);
        if selected > 0 {
            assert_eq!(chosen[0], sources[0]);
        }
    }

    #[rstest]
    #[case("first-only", Ok(SourceSelection::FirstOnly))]
    #[case("all", Ok(SourceSelection::All))]
    #[case("First-Only", Err(UnknownSourceSelection))]
    #[case("", Err(UnknownSourceSelection))]
    fn test_parse_selection(#[case] input: &str, #[case] expected: Result<SourceSelection, UnknownSourceSelection>) {
        assert_eq!(input.parse::<SourceSelection>(), expected);
    }

    #[test]
    fn test_selection_display_parses_back() {
        for selection in [SourceSelection::FirstOnly, SourceSelection::All] {
            assert_eq!(selection.to_string().parse::<SourceSelection>(), Ok(selection));
        }
    }
}
