//! Session naming grammar and the closed set of fleet roles.
//!
//! Canonical session names are `gt-<scope>-<role>[-<name>]`, where scope is
//! the town name for the two town-level singletons and a rig name otherwise.
//! Worker identities are `/`-delimited addresses (`rig/polecats/name`,
//! `rig/crew/name`, `mayor/`).

use std::fmt;

/// Prefix shared by every fleet session.
pub const SESSION_PREFIX: &str = "gt";

/// Role keyword segments as they appear in session names.
const MAYOR: &str = "mayor";
const DEACON: &str = "deacon";
const WITNESS: &str = "witness";
const REFINERY: &str = "refinery";
const CREW: &str = "crew";
const POLECATS: &str = "polecats";

/// Every role a session or worker identity can hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// Town coordinator.
    Mayor,
    /// Town patrol executor.
    Deacon,
    /// Per-rig reviewer.
    Witness,
    /// Per-rig build integrator.
    Refinery,
    /// Dynamically spawned worker in a rig's pool.
    Polecat(String),
    /// Human-operated session in a rig.
    Crew(String),
}

impl Role {
    /// True for the roles scoped to the town rather than a rig.
    pub const fn is_town_level(&self) -> bool {
        match self {
            Role::Mayor | Role::Deacon => true,
            Role::Witness | Role::Refinery | Role::Polecat(_) | Role::Crew(_) => false,
        }
    }

    /// Short keyword used in reports.
    pub const fn keyword(&self) -> &'static str {
        match self {
            Role::Mayor => MAYOR,
            Role::Deacon => DEACON,
            Role::Witness => WITNESS,
            Role::Refinery => REFINERY,
            Role::Polecat(_) => "polecat",
            Role::Crew(_) => CREW,
        }
    }

    /// Canonical session name for this role. `scope` is the town name for
    /// town-level roles and the rig name for everything else.
    pub fn session_name(&self, scope: &str) -> String {
        match self {
            Role::Mayor | Role::Deacon | Role::Witness | Role::Refinery => {
                format!("{SESSION_PREFIX}-{scope}-{}", self.keyword())
            }
            Role::Polecat(name) => format!("{SESSION_PREFIX}-{scope}-{name}"),
            Role::Crew(name) => format!("{SESSION_PREFIX}-{scope}-{CREW}-{name}"),
        }
    }

    /// Worker identity address for this role.
    pub fn address(&self, rig: &str) -> String {
        match self {
            Role::Mayor => format!("{MAYOR}/"),
            Role::Deacon => format!("{DEACON}/"),
            Role::Witness => format!("{rig}/{WITNESS}"),
            Role::Refinery => format!("{rig}/{REFINERY}"),
            Role::Polecat(name) => format!("{rig}/{POLECATS}/{name}"),
            Role::Crew(name) => format!("{rig}/{CREW}/{name}"),
        }
    }

    /// Interpret the trailing part of a rig-scoped session name.
    ///
    /// Anything that is not a fixed rig role is taken to be a worker name;
    /// this cannot be verified without live assignment state.
    pub fn from_rig_suffix(suffix: &str) -> Self {
        match suffix {
            WITNESS => Role::Witness,
            REFINERY => Role::Refinery,
            _ => match suffix.strip_prefix("crew-") {
                Some(name) if !name.is_empty() => Role::Crew(name.to_string()),
                _ => Role::Polecat(suffix.to_string()),
            },
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Polecat(name) | Role::Crew(name) => write!(f, "{}/{name}", self.keyword()),
            _ => f.write_str(self.keyword()),
        }
    }
}

/// Canonical coordinator and patrol-executor session names for a town.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TownSessions {
    pub mayor: String,
    pub deacon: String,
}

impl TownSessions {
    pub fn for_town(town: &str) -> Self {
        Self {
            mayor: Role::Mayor.session_name(town),
            deacon: Role::Deacon.session_name(town),
        }
    }

    pub fn contains(&self, session: &str) -> bool {
        (!self.mayor.is_empty() && session == self.mayor)
            || (!self.deacon.is_empty() && session == self.deacon)
    }
}

/// A fleet session name split at the rig boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RigSession<'a> {
    pub rig: &'a str,
    pub role: Role,
}

/// True if the session carries the fleet prefix (`gt-...`).
pub fn is_fleet_session(session: &str) -> bool {
    session
        .strip_prefix(SESSION_PREFIX)
        .is_some_and(|rest| rest.starts_with('-'))
}

/// Split `gt-<rig>-<rest>` into its rig and role. Returns `None` when the
/// name has fewer than three `-`-delimited parts or lacks the fleet prefix.
pub fn parse_rig_session(session: &str) -> Option<RigSession<'_>> {
    let mut parts = session.splitn(3, '-');
    let tag = parts.next()?;
    let rig = parts.next()?;
    let rest = parts.next()?;
    if tag != SESSION_PREFIX {
        return None;
    }
    Some(RigSession {
        rig,
        role: Role::from_rig_suffix(rest),
    })
}

/// Structural check for crew sessions: `gt-<rig>-crew-<name>`.
///
/// Only the shape is checked; the rig segment is not matched against known
/// rigs, so a rig name containing `-` shifts the `crew` marker out of place.
pub fn is_crew_session(session: &str) -> bool {
    let parts: Vec<&str> = session.split('-').collect();
    parts.len() >= 4 && parts[0] == SESSION_PREFIX && parts[2] == CREW
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_names_follow_grammar() {
        assert_eq!(Role::Mayor.session_name("acme"), "gt-acme-mayor");
        assert_eq!(Role::Deacon.session_name("acme"), "gt-acme-deacon");
        assert_eq!(Role::Witness.session_name("rig1"), "gt-rig1-witness");
        assert_eq!(Role::Refinery.session_name("rig1"), "gt-rig1-refinery");
        assert_eq!(Role::Polecat("nux".into()).session_name("rig1"), "gt-rig1-nux");
        assert_eq!(Role::Crew("joe".into()).session_name("rig1"), "gt-rig1-crew-joe");
    }

    #[test]
    fn addresses() {
        assert_eq!(Role::Mayor.address("ignored"), "mayor/");
        assert_eq!(Role::Witness.address("gastown"), "gastown/witness");
        assert_eq!(Role::Polecat("nux".into()).address("gastown"), "gastown/polecats/nux");
        assert_eq!(Role::Crew("max".into()).address("gastown"), "gastown/crew/max");
    }

    #[test]
    fn rig_suffix_roles() {
        assert_eq!(Role::from_rig_suffix("witness"), Role::Witness);
        assert_eq!(Role::from_rig_suffix("refinery"), Role::Refinery);
        assert_eq!(Role::from_rig_suffix("crew-joe"), Role::Crew("joe".into()));
        assert_eq!(Role::from_rig_suffix("crew-"), Role::Polecat("crew-".into()));
        assert_eq!(Role::from_rig_suffix("toast"), Role::Polecat("toast".into()));
    }

    #[test]
    fn town_level_roles() {
        assert!(Role::Mayor.is_town_level());
        assert!(Role::Deacon.is_town_level());
        assert!(!Role::Witness.is_town_level());
        assert!(!Role::Crew("x".into()).is_town_level());
    }

    #[test]
    fn parse_rig_session_splits_at_most_three() {
        let parsed = parse_rig_session("gt-old-rig-witness").unwrap();
        assert_eq!(parsed.rig, "old");
        assert_eq!(parsed.role, Role::Polecat("rig-witness".into()));

        let parsed = parse_rig_session("gt-gastown-crew-joe").unwrap();
        assert_eq!(parsed.rig, "gastown");
        assert_eq!(parsed.role, Role::Crew("joe".into()));

        assert!(parse_rig_session("gt-lonely").is_none());
        assert!(parse_rig_session("xx-rig-witness").is_none());
    }

    #[test]
    fn fleet_prefix() {
        assert!(is_fleet_session("gt-acme-mayor"));
        assert!(!is_fleet_session("gtx-acme"));
        assert!(!is_fleet_session("personal"));
        assert!(!is_fleet_session(""));
    }

    #[test]
    fn crew_session_shape() {
        assert!(is_crew_session("gt-gastown-crew-joe"));
        assert!(is_crew_session("gt-gastown-crew-joe-two"));
        assert!(!is_crew_session("gt-gastown-witness"));
        assert!(!is_crew_session("gt-gastown-crew"));
        assert!(!is_crew_session("xx-gastown-crew-joe"));
        // hyphenated rig names push the marker out of position
        assert!(!is_crew_session("gt-my-rig-crew-joe"));
    }

    #[test]
    fn town_sessions() {
        let town = TownSessions::for_town("acme");
        assert!(town.contains("gt-acme-mayor"));
        assert!(town.contains("gt-acme-deacon"));
        assert!(!town.contains("gt-acme-witness"));
    }
}
