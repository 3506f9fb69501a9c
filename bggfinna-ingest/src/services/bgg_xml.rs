//! BoardGameGeek XML API2 response parsing
//!
//! Two documents are understood: the search listing (`/search`) and the
//! detail listing with statistics (`/thing?stats=1`). Both are `<items>`
//! roots holding `<item>` children whose fields are carried in `value`
//! attributes. Zero values mean "unknown" in this API and map to None.

use crate::error::{IngestError, IngestResult};
use bggfinna_common::models::{EnrichedGame, ExternalId};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// One search hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub external_id: ExternalId,
    /// Primary name if listed, otherwise the first name
    pub candidate_title: String,
    /// Every name listed for the hit, primary first
    pub names: Vec<String>,
    pub publication_year: Option<i32>,
}

impl SearchCandidate {
    pub fn new(external_id: ExternalId, title: impl Into<String>, year: Option<i32>) -> Self {
        let title = title.into();
        Self {
            external_id,
            names: vec![title.clone()],
            candidate_title: title,
            publication_year: year,
        }
    }

    /// Add an alternate name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }
}

fn malformed(context: &str, err: impl std::fmt::Display) -> IngestError {
    IngestError::MalformedResponse(format!("{}: {}", context, err))
}

fn attr(element: &BytesStart<'_>, name: &str) -> IngestResult<Option<String>> {
    let found = element
        .try_get_attribute(name)
        .map_err(|e| malformed("bad attribute", e))?;
    match found {
        Some(attribute) => {
            let value = attribute
                .unescape_value()
                .map_err(|e| malformed("bad attribute value", e))?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

fn item_id(element: &BytesStart<'_>) -> IngestResult<ExternalId> {
    let raw = attr(element, "id")?.ok_or_else(|| malformed("item", "missing id"))?;
    raw.parse::<ExternalId>()
        .map_err(|e| malformed(&format!("item id '{}'", raw), e))
}

/// Items without a `type` attribute are treated as board games
fn is_board_game(element: &BytesStart<'_>) -> IngestResult<bool> {
    Ok(attr(element, "type")?.map_or(true, |kind| kind == "boardgame"))
}

fn positive_u32(value: Option<String>) -> Option<u32> {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| *v > 0)
}

fn positive_i32(value: Option<String>) -> Option<i32> {
    value
        .and_then(|v| v.trim().parse::<i32>().ok())
        .filter(|v| *v > 0)
}

fn positive_f64(value: Option<String>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Read events until the document root, rejecting anything but `<items>`
///
/// An `<errors>` or `<error>` root is reported with its message text.
fn expect_items_root(reader: &mut Reader<&[u8]>) -> IngestResult<()> {
    loop {
        match reader.read_event().map_err(|e| malformed("xml", e))? {
            Event::Start(e) | Event::Empty(e) => {
                return match e.name().as_ref() {
                    b"items" => Ok(()),
                    b"errors" | b"error" => Err(IngestError::MalformedResponse(format!(
                        "API error document: {}",
                        remaining_text(reader)
                    ))),
                    other => Err(malformed(
                        "unexpected root element",
                        String::from_utf8_lossy(other),
                    )),
                };
            }
            Event::Eof => return Err(malformed("xml", "empty document")),
            _ => {}
        }
    }
}

fn remaining_text(reader: &mut Reader<&[u8]>) -> String {
    let mut text = String::new();
    while let Ok(event) = reader.read_event() {
        match event {
            Event::Text(t) => {
                if let Ok(s) = t.unescape() {
                    text.push_str(s.trim());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    text
}

/// Parse a search listing into candidates in response order
pub fn parse_search_response(xml: &str) -> IngestResult<Vec<SearchCandidate>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    expect_items_root(&mut reader)?;

    let mut candidates = Vec::new();
    let mut current: Option<(ExternalId, Vec<String>, Option<String>, Option<i32>)> = None;

    loop {
        match reader.read_event().map_err(|e| malformed("search xml", e))? {
            Event::Start(e) if e.name().as_ref() == b"item" => {
                let id = item_id(&e)?;
                if is_board_game(&e)? {
                    current = Some((id, Vec::new(), None, None));
                } else {
                    reader
                        .read_to_end(e.name())
                        .map_err(|err| malformed("search xml", err))?;
                }
            }
            Event::Empty(e) if e.name().as_ref() == b"item" => {
                // Item without children carries no name; nothing to match on
                item_id(&e)?;
            }
            Event::Start(e) | Event::Empty(e) => {
                if let Some((_, names, primary, year)) = current.as_mut() {
                    match e.name().as_ref() {
                        b"name" => {
                            if let Some(value) = attr(&e, "value")? {
                                if attr(&e, "type")?.as_deref() == Some("primary") && primary.is_none() {
                                    *primary = Some(value.clone());
                                }
                                names.push(value);
                            }
                        }
                        b"yearpublished" => *year = positive_i32(attr(&e, "value")?),
                        _ => {}
                    }
                }
            }
            Event::End(e) if e.name().as_ref() == b"item" => {
                if let Some((id, mut names, primary, year)) = current.take() {
                    if let Some(primary) = primary {
                        names.retain(|n| n != &primary);
                        names.insert(0, primary);
                    }
                    if let Some(title) = names.first().cloned() {
                        candidates.push(SearchCandidate {
                            external_id: id,
                            candidate_title: title,
                            names,
                            publication_year: year,
                        });
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if current.is_some() {
        return Err(malformed("search xml", "unterminated item"));
    }

    Ok(candidates)
}

/// Parse a detail listing into enriched games in response order
pub fn parse_thing_response(xml: &str, fetched_at: DateTime<Utc>) -> IngestResult<Vec<EnrichedGame>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    expect_items_root(&mut reader)?;

    let mut games = Vec::new();
    let mut current: Option<EnrichedGame> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event().map_err(|e| malformed("thing xml", e))? {
            Event::Start(e) if e.name().as_ref() == b"item" && current.is_none() => {
                let id = item_id(&e)?;
                if is_board_game(&e)? {
                    current = Some(EnrichedGame::new(id, fetched_at));
                    depth = 0;
                } else {
                    tracing::debug!(id = %id, "Skipping non-boardgame item");
                    reader
                        .read_to_end(e.name())
                        .map_err(|err| malformed("thing xml", err))?;
                }
            }
            Event::Start(e) => {
                if let Some(game) = current.as_mut() {
                    depth += 1;
                    apply_field(game, &e)?;
                }
            }
            Event::Empty(e) => {
                if let Some(game) = current.as_mut() {
                    apply_field(game, &e)?;
                }
            }
            Event::End(e) => {
                if current.is_some() {
                    if depth == 0 && e.name().as_ref() == b"item" {
                        if let Some(game) = current.take() {
                            games.push(game);
                        }
                    } else {
                        depth = depth.saturating_sub(1);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if current.is_some() {
        return Err(malformed("thing xml", "unterminated item"));
    }

    Ok(games)
}

fn apply_field(game: &mut EnrichedGame, e: &BytesStart<'_>) -> IngestResult<()> {
    match e.name().as_ref() {
        b"name" => {
            if attr(e, "type")?.as_deref() == Some("primary") && game.primary_name.is_empty() {
                game.primary_name = attr(e, "value")?.unwrap_or_default();
            }
        }
        b"yearpublished" => game.year_published = positive_i32(attr(e, "value")?),
        b"minplayers" => game.min_players = positive_u32(attr(e, "value")?),
        b"maxplayers" => game.max_players = positive_u32(attr(e, "value")?),
        b"minplaytime" => game.min_playtime = positive_u32(attr(e, "value")?),
        b"maxplaytime" => game.max_playtime = positive_u32(attr(e, "value")?),
        b"minage" => game.min_age = positive_u32(attr(e, "value")?),
        b"usersrated" => game.users_rated = positive_u32(attr(e, "value")?),
        b"average" => game.rating = positive_f64(attr(e, "value")?),
        b"bayesaverage" => game.bayes_average = positive_f64(attr(e, "value")?),
        b"averageweight" => game.weight = positive_f64(attr(e, "value")?),
        b"rank" => {
            if attr(e, "name")?.as_deref() == Some("boardgame") {
                // "Not Ranked" fails to parse and stays None
                game.rank = positive_u32(attr(e, "value")?);
            }
        }
        b"link" => {
            let value = match attr(e, "value")? {
                Some(v) if !v.trim().is_empty() => v,
                _ => return Ok(()),
            };
            match attr(e, "type")?.as_deref() {
                Some("boardgamecategory") => {
                    game.categories.insert(value);
                }
                Some("boardgamemechanic") => {
                    game.mechanics.insert(value);
                }
                Some("boardgamedesigner") => {
                    game.designers.insert(value);
                }
                Some("boardgamepublisher") => {
                    game.publishers.insert(value);
                }
                _ => {}
            }
        }
        _ => {}
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_search_keeps_order_and_years() {
        let candidates = parse_search_response(CATAN_SEARCH).unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].external_id, ExternalId(13));
        assert_eq!(candidates[0].candidate_title, "CATAN");
        assert_eq!(candidates[0].publication_year, Some(1995));
        assert_eq!(candidates[1].candidate_title, "CATAN: Cities & Knights");
        assert_eq!(candidates[2].candidate_title, "Catan Dice Game");
        assert_eq!(candidates[2].publication_year, None);
    }

    #[test]
    fn test_parse_empty_search() {
        let xml = r#"<items total="0" termsofuse="x"></items>"#;
        assert!(parse_search_response(xml).unwrap().is_empty());
    }

    #[test]
    fn test_parse_search_rejects_non_items_root() {
        let result = parse_search_response("<html><body>Bad gateway</body></html>");
        assert!(matches!(result, Err(IngestError::MalformedResponse(_))));
    }

    #[test]
    fn test_parse_search_rejects_truncated_document() {
        let xml = r#"<items total="1"><item type="boardgame" id="13"><name type="primary" value="CATAN"/>"#;
        assert!(matches!(
            parse_search_response(xml),
            Err(IngestError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_search_skips_non_boardgame_items() {
        let xml = r#"<items total="3">
            <item type="boardgame" id="13">
                <name type="primary" value="CATAN"/>
                <yearpublished value="1995"/>
            </item>
            <item type="boardgameexpansion" id="926">
                <name type="primary" value="CATAN: Cities &amp; Knights"/>
                <yearpublished value="1998"/>
            </item>
            <item id="27710">
                <name type="primary" value="Catan Dice Game"/>
            </item>
        </items>"#;

        let candidates = parse_search_response(xml).unwrap();
        let ids: Vec<ExternalId> = candidates.iter().map(|c| c.external_id).collect();
        assert_eq!(ids, vec![ExternalId(13), ExternalId(27710)]);
    }

    #[test]
    fn test_parse_thing_skips_non_boardgame_items() {
        let xml = r#"<items>
            <item type="boardgameexpansion" id="926">
                <name type="primary" value="CATAN: Cities &amp; Knights" />
                <minplayers value="3" />
                <link type="boardgameexpansion" id="13" value="CATAN" inbound="true" />
            </item>
            <item type="boardgame" id="822">
                <name type="primary" value="Carcassonne" />
                <minplayers value="2" />
            </item>
        </items>"#;

        let games = parse_thing_response(xml, now()).unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].external_id, ExternalId(822));
        assert_eq!(games[0].primary_name, "Carcassonne");
        assert_eq!(games[0].min_players, Some(2));
    }

    #[test]
    fn test_parse_thing_full_record() {
        let games = parse_thing_response(CATAN_THING, now()).unwrap();
        assert_eq!(games.len(), 1);

        let game = &games[0];
        assert_eq!(game.external_id, ExternalId(13));
        assert_eq!(game.primary_name, "CATAN");
        assert_eq!(game.year_published, Some(1995));
        assert_eq!(game.min_players, Some(3));
        assert_eq!(game.max_players, Some(4));
        assert_eq!(game.min_playtime, Some(60));
        assert_eq!(game.max_playtime, Some(120));
        assert_eq!(game.min_age, Some(10));
        assert_eq!(game.rank, Some(556));
        assert_eq!(game.rating, Some(7.09));
        assert_eq!(game.bayes_average, Some(6.9));
        assert_eq!(game.users_rated, Some(123456));
        assert_eq!(game.weight, Some(2.29));
        assert!(game.categories.contains("Economic"));
        assert!(game.categories.contains("Negotiation"));
        assert_eq!(game.mechanics.len(), 2);
        assert!(game.designers.contains("Klaus Teuber"));
        assert!(game.publishers.contains("KOSMOS"));
        assert_eq!(game.fetched_at, now());
    }

    #[test]
    fn test_parse_thing_not_ranked_and_zero_values() {
        let xml = r#"<items>
            <item type="boardgame" id="999">
                <name type="primary" value="Obscure Game" />
                <yearpublished value="0" />
                <minplayers value="2" />
                <maxplayers value="0" />
                <statistics><ratings>
                    <usersrated value="0" />
                    <average value="0" />
                    <ranks><rank type="subtype" name="boardgame" value="Not Ranked" /></ranks>
                    <averageweight value="0" />
                </ratings></statistics>
            </item>
        </items>"#;

        let games = parse_thing_response(xml, now()).unwrap();
        let game = &games[0];
        assert_eq!(game.year_published, None);
        assert_eq!(game.min_players, Some(2));
        assert_eq!(game.max_players, None);
        assert_eq!(game.rank, None);
        assert_eq!(game.rating, None);
        assert_eq!(game.weight, None);
        assert_eq!(game.users_rated, None);
    }

    #[test]
    fn test_parse_thing_omits_unknown_ids() {
        let xml = r#"<items termsofuse="x"></items>"#;
        assert!(parse_thing_response(xml, now()).unwrap().is_empty());
    }

    #[test]
    fn test_parse_thing_error_document() {
        let xml = r#"<errors><error><message>Rate limit exceeded.</message></error></errors>"#;
        match parse_thing_response(xml, now()) {
            Err(IngestError::MalformedResponse(msg)) => assert!(msg.contains("Rate limit exceeded")),
            other => panic!("expected MalformedResponse, got {:?}", other),
        }
    }
}
