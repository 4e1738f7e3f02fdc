use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::feed::FeedBundle;
use crate::fpl_fetch::{
    Bootstrap, BootstrapPlayer, BootstrapTeam, ChangeType, GameweekEvent, PriceChangeHistory,
    PriceChangeRecord, transfer_feed_from_bootstrap,
};

const TEAMS: [(&str, &str); 20] = [
    ("Arsenal", "ARS"),
    ("Aston Villa", "AVL"),
    ("Bournemouth", "BOU"),
    ("Brentford", "BRE"),
    ("Brighton", "BHA"),
    ("Chelsea", "CHE"),
    ("Crystal Palace", "CRY"),
    ("Everton", "EVE"),
    ("Fulham", "FUL"),
    ("Ipswich", "IPS"),
    ("Leicester", "LEI"),
    ("Liverpool", "LIV"),
    ("Man City", "MCI"),
    ("Man Utd", "MUN"),
    ("Newcastle", "NEW"),
    ("Nott'm Forest", "NFO"),
    ("Southampton", "SOU"),
    ("Spurs", "TOT"),
    ("West Ham", "WHU"),
    ("Wolves", "WOL"),
];

const PLAYERS_PER_TEAM: u32 = 6;
const DEMO_MANAGERS: u64 = 10_500_000;

/// Synthetic feed for offline runs. The same seed and `now` always yield the
/// same bundle.
pub fn demo_bundle(seed: u64, now: DateTime<Utc>) -> FeedBundle {
    let mut rng = StdRng::seed_from_u64(seed);

    let teams = TEAMS
        .iter()
        .enumerate()
        .map(|(idx, (name, short))| BootstrapTeam {
            id: idx as u32 + 1,
            name: name.to_string(),
            short_name: short.to_string(),
        })
        .collect::<Vec<_>>();

    let mut elements = Vec::new();
    for team in &teams {
        for slot in 0..PLAYERS_PER_TEAM {
            let id = (team.id - 1) * PLAYERS_PER_TEAM + slot + 1;
            elements.push(demo_player(&mut rng, id, team, slot));
        }
    }

    let mut history = PriceChangeHistory::default();
    for player in &elements {
        if !rng.gen_bool(0.08) {
            continue;
        }
        let hours_ago = rng.gen_range(2..(24 * 9));
        let record = PriceChangeRecord {
            player_id: player.id,
            change_time: now - ChronoDuration::hours(hours_ago),
            change_type: if player.transfers_in_event >= player.transfers_out_event {
                ChangeType::Rise
            } else {
                ChangeType::Fall
            },
        };
        match record.change_type {
            ChangeType::Rise => history.risers.push(record),
            ChangeType::Fall => history.fallers.push(record),
        }
    }

    let bootstrap = Bootstrap {
        elements,
        teams,
        events: vec![
            GameweekEvent {
                id: 20,
                deadline_time: Some(now - ChronoDuration::days(3)),
                is_current: true,
                is_next: false,
            },
            GameweekEvent {
                id: 21,
                deadline_time: Some(now + ChronoDuration::days(4)),
                is_current: false,
                is_next: true,
            },
        ],
        total_players: Some(DEMO_MANAGERS),
    };
    let transfers = transfer_feed_from_bootstrap(&bootstrap, 40);

    FeedBundle {
        bootstrap,
        transfers,
        history: Some(history),
    }
}

fn demo_player(rng: &mut StdRng, id: u32, team: &BootstrapTeam, slot: u32) -> BootstrapPlayer {
    let element_type = match slot {
        0 => 1,
        1 | 2 => 2,
        3 | 4 => 3,
        _ => 4,
    };
    // Ownership is heavily skewed: a handful of template picks, a long tail.
    let ownership = (rng.r#gen::<f64>().powi(3) * 65.0).max(0.1);
    let popularity = rng.r#gen::<f64>();
    let (tin, tout) = if popularity > 0.75 {
        (rng.gen_range(60_000..700_000), rng.gen_range(0..30_000))
    } else if popularity < 0.25 {
        (rng.gen_range(0..30_000), rng.gen_range(60_000..600_000))
    } else {
        (rng.gen_range(0..40_000), rng.gen_range(0..40_000))
    };
    let status = if rng.gen_bool(0.06) {
        "d"
    } else if rng.gen_bool(0.04) {
        "i"
    } else {
        "a"
    };

    BootstrapPlayer {
        id,
        web_name: format!("{}{}", team.short_name, slot + 1),
        element_type,
        team: team.id,
        selected_by_percent: format!("{ownership:.1}"),
        form: format!("{:.1}", rng.gen_range(0.0..9.0)),
        now_cost: rng.gen_range(40..140),
        total_points: rng.gen_range(0..180),
        status: Some(status.to_string()),
        transfers_in_event: tin,
        transfers_out_event: tout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn same_seed_same_bundle() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let a = demo_bundle(7, now);
        let b = demo_bundle(7, now);
        assert_eq!(a.bootstrap.elements.len(), 120);
        assert_eq!(
            a.bootstrap.elements.iter().map(|p| p.transfers_in_event).collect::<Vec<_>>(),
            b.bootstrap.elements.iter().map(|p| p.transfers_in_event).collect::<Vec<_>>()
        );
        assert_eq!(a.history, b.history);
        assert!(!a.transfers.transfers_in.is_empty());
    }
}
