// Sort keys accepted by the listing endpoint and their ORDER BY expressions

use super::CatalogMode;
use tracing::debug;

/// Ordering used when the caller sends a key we do not recognise.
pub const FALLBACK_ORDER: &str = "year DESC NULLS LAST";

/// Appended to every ordering so rows with equal sort values keep a stable
/// position across page boundaries.
pub const TIE_BREAKER: &str = "title ASC, rowid ASC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortKey {
    GapDesc,
    GapAsc,
    /// Biggest disagreement first, regardless of which side rates higher.
    GapAbsDesc,
    GapAbsAsc,
    YearDesc,
    YearAsc,
    ImdbDesc,
    ImdbAsc,
    DoubanDesc,
    DoubanAsc,
    /// Combined IMDb + Douban votes, missing counts treated as zero.
    VotesDesc,
    VotesAsc,
    ScoreDesc,
    ScoreAsc,
    ReliabilityDesc,
    ReliabilityAsc,
}

impl SortKey {
    pub const ALL: [SortKey; 16] = [
        SortKey::GapDesc,
        SortKey::GapAsc,
        SortKey::GapAbsDesc,
        SortKey::GapAbsAsc,
        SortKey::YearDesc,
        SortKey::YearAsc,
        SortKey::ImdbDesc,
        SortKey::ImdbAsc,
        SortKey::DoubanDesc,
        SortKey::DoubanAsc,
        SortKey::VotesDesc,
        SortKey::VotesAsc,
        SortKey::ScoreDesc,
        SortKey::ScoreAsc,
        SortKey::ReliabilityDesc,
        SortKey::ReliabilityAsc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::GapDesc => "gap_desc",
            SortKey::GapAsc => "gap_asc",
            SortKey::GapAbsDesc => "gap_abs_desc",
            SortKey::GapAbsAsc => "gap_abs_asc",
            SortKey::YearDesc => "year_desc",
            SortKey::YearAsc => "year_asc",
            SortKey::ImdbDesc => "imdb_desc",
            SortKey::ImdbAsc => "imdb_asc",
            SortKey::DoubanDesc => "douban_desc",
            SortKey::DoubanAsc => "douban_asc",
            SortKey::VotesDesc => "votes_desc",
            SortKey::VotesAsc => "votes_asc",
            SortKey::ScoreDesc => "score_desc",
            SortKey::ScoreAsc => "score_asc",
            SortKey::ReliabilityDesc => "reliability_desc",
            SortKey::ReliabilityAsc => "reliability_asc",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(wanted))
    }

    /// Primary ORDER BY expression. Nulls always sort after real values.
    pub fn order_by(&self) -> &'static str {
        match self {
            SortKey::GapDesc => "(douban_rating - imdb_rating) DESC NULLS LAST",
            SortKey::GapAsc => "(douban_rating - imdb_rating) ASC NULLS LAST",
            SortKey::GapAbsDesc => "ABS(douban_rating - imdb_rating) DESC NULLS LAST",
            SortKey::GapAbsAsc => "ABS(douban_rating - imdb_rating) ASC NULLS LAST",
            SortKey::YearDesc => "year DESC NULLS LAST",
            SortKey::YearAsc => "year ASC NULLS LAST",
            SortKey::ImdbDesc => "imdb_rating DESC NULLS LAST",
            SortKey::ImdbAsc => "imdb_rating ASC NULLS LAST",
            SortKey::DoubanDesc => "douban_rating DESC NULLS LAST",
            SortKey::DoubanAsc => "douban_rating ASC NULLS LAST",
            SortKey::VotesDesc => "(COALESCE(imdb_votes, 0) + COALESCE(douban_votes, 0)) DESC",
            SortKey::VotesAsc => "(COALESCE(imdb_votes, 0) + COALESCE(douban_votes, 0)) ASC",
            SortKey::ScoreDesc => "score DESC NULLS LAST",
            SortKey::ScoreAsc => "score ASC NULLS LAST",
            SortKey::ReliabilityDesc => "reliability DESC NULLS LAST",
            SortKey::ReliabilityAsc => "reliability ASC NULLS LAST",
        }
    }

    /// Key used when the request names none.
    pub fn default_for(mode: CatalogMode) -> Self {
        match mode {
            CatalogMode::Base => SortKey::GapDesc,
            CatalogMode::Hybrid => SortKey::ScoreDesc,
        }
    }
}

/// Full ORDER BY clause body for a requested sort.
pub fn resolve_order(requested: Option<&str>, mode: CatalogMode) -> String {
    let primary = match requested.map(str::trim).filter(|s| !s.is_empty()) {
        None => SortKey::default_for(mode).order_by(),
        Some(raw) => match SortKey::parse(raw) {
            Some(key) => key.order_by(),
            None => {
                debug!(sort = raw, "unknown sort key; using fallback order");
                FALLBACK_ORDER
            }
        },
    };
    format!("{primary}, {TIE_BREAKER}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_key_round_trips_through_its_name() {
        for key in SortKey::ALL {
            assert_eq!(SortKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(SortKey::parse(" GAP_DESC "), Some(SortKey::GapDesc));
    }

    #[test]
    fn nullable_keys_sort_nulls_last() {
        for key in SortKey::ALL {
            let expr = key.order_by();
            if matches!(key, SortKey::VotesDesc | SortKey::VotesAsc) {
                assert!(expr.contains("COALESCE"), "{expr}");
            } else {
                assert!(expr.ends_with("NULLS LAST"), "{expr}");
            }
        }
    }

    #[test]
    fn magnitude_sort_uses_absolute_gap() {
        assert!(SortKey::GapAbsDesc.order_by().starts_with("ABS("));
        assert!(!SortKey::GapDesc.order_by().contains("ABS"));
    }

    #[test]
    fn unknown_key_falls_back_to_recent_years() {
        assert_eq!(
            resolve_order(Some("rating_by_vibes"), CatalogMode::Base),
            format!("{FALLBACK_ORDER}, {TIE_BREAKER}")
        );
    }

    #[test]
    fn default_depends_on_mode() {
        assert!(resolve_order(None, CatalogMode::Base).starts_with("(douban_rating - imdb_rating) DESC"));
        assert!(resolve_order(Some(""), CatalogMode::Hybrid).starts_with("score DESC"));
    }
}
