//! Random values generated once and kept in state until destroyed.

use super::{payload, payload_mut, Provider, ProviderContext};
use crate::error::ProviderError;
use jumppad_schema::kinds::{RandomCreature, RandomId, RandomNumber, RandomPassword, RandomUuid};
use jumppad_schema::Resource;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

const DEFAULT_ID_BYTES: usize = 8;
const DEFAULT_SPECIAL: &str = "!@#$%&*()-_=+[]{}<>:?";
const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NUMERIC: &str = "0123456789";

const CREATURES: &[&str] = &[
    "aardvark", "albatross", "axolotl", "badger", "basilisk", "beaver", "capybara", "centaur",
    "chimera", "cougar", "dingo", "dragon", "echidna", "falcon", "ferret", "gecko", "gryphon",
    "hippogriff", "ibex", "jackal", "kelpie", "kraken", "lemur", "lynx", "manticore", "marmot",
    "narwhal", "ocelot", "otter", "pangolin", "pegasus", "phoenix", "quokka", "raccoon",
    "salamander", "sphinx", "tapir", "unicorn", "vulture", "walrus", "wombat", "yeti", "zebra",
];

#[derive(Debug, Default)]
pub struct RandomNumberProvider;

impl Provider for RandomNumberProvider {
    fn kind(&self) -> &'static str {
        "random_number"
    }

    fn create(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let n: RandomNumber = payload(resource)?;
        if n.value.is_some() {
            return Ok(());
        }
        if n.minimum > n.maximum {
            return Err(ProviderError::invalid(format!(
                "{}: minimum {} is greater than maximum {}",
                resource.id(),
                n.minimum,
                n.maximum
            )));
        }
        let value = rand::thread_rng().gen_range(n.minimum..=n.maximum);
        debug!(id = %resource.id(), value, "generated random number");
        payload_mut::<RandomNumber>(resource)?.value = Some(value);
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>, _force: bool) -> Result<(), ProviderError> {
        payload_mut::<RandomNumber>(resource)?.value = None;
        Ok(())
    }

    fn lookup(&self, _resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Decimal rendering of a big-endian unsigned integer of any length.
fn to_decimal(bytes: &[u8]) -> String {
    let mut digits: Vec<u8> = vec![0];
    for &b in bytes {
        let mut carry = u32::from(b);
        for d in &mut digits {
            let v = u32::from(*d) * 256 + carry;
            *d = (v % 10) as u8;
            carry = v / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }
    digits.iter().rev().map(|d| char::from(b'0' + d)).collect()
}

#[derive(Debug, Default)]
pub struct RandomIdProvider;

impl Provider for RandomIdProvider {
    fn kind(&self) -> &'static str {
        "random_id"
    }

    fn create(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let id: RandomId = payload(resource)?;
        if !id.hex.is_empty() {
            return Ok(());
        }
        let len = if id.byte_length == 0 {
            DEFAULT_ID_BYTES
        } else {
            id.byte_length
        };
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill(bytes.as_mut_slice());
        let out = payload_mut::<RandomId>(resource)?;
        out.hex = bytes.iter().map(|b| format!("{b:02x}")).collect();
        out.dec = to_decimal(&bytes);
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>, _force: bool) -> Result<(), ProviderError> {
        let out = payload_mut::<RandomId>(resource)?;
        out.hex.clear();
        out.dec.clear();
        Ok(())
    }

    fn lookup(&self, _resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Generate a password honouring the enabled classes and their minimums.
pub(crate) fn generate_password(p: &RandomPassword) -> Result<String, ProviderError> {
    let special = if p.override_special.is_empty() {
        DEFAULT_SPECIAL
    } else {
        p.override_special.as_str()
    };
    let classes: Vec<(&str, usize)> = [
        (p.lower, LOWER, p.min_lower),
        (p.upper, UPPER, p.min_upper),
        (p.numeric, NUMERIC, p.min_numeric),
        (p.special, special, p.min_special),
    ]
    .into_iter()
    .filter(|(on, _, _)| *on)
    .map(|(_, set, min)| (set, min))
    .collect();

    if p.length == 0 {
        return Err(ProviderError::invalid("password length must be greater than zero"));
    }
    if classes.is_empty() {
        return Err(ProviderError::invalid("password has every character class disabled"));
    }
    let required: usize = classes.iter().map(|(_, min)| min).sum();
    if required > p.length {
        return Err(ProviderError::invalid(format!(
            "password minimums add up to {required}, more than length {}",
            p.length
        )));
    }

    let mut rng = rand::thread_rng();
    let pick = |set: &str, rng: &mut rand::rngs::ThreadRng| {
        let chars: Vec<char> = set.chars().collect();
        chars[rng.gen_range(0..chars.len())]
    };
    let mut out: Vec<char> = Vec::with_capacity(p.length);
    for (set, min) in &classes {
        for _ in 0..*min {
            out.push(pick(set, &mut rng));
        }
    }
    let all: String = classes.iter().map(|(set, _)| *set).collect();
    while out.len() < p.length {
        out.push(pick(&all, &mut rng));
    }
    out.shuffle(&mut rng);
    Ok(out.into_iter().collect())
}

#[derive(Debug, Default)]
pub struct RandomPasswordProvider;

impl Provider for RandomPasswordProvider {
    fn kind(&self) -> &'static str {
        "random_password"
    }

    fn create(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let p: RandomPassword = payload(resource)?;
        if !p.value.is_empty() {
            return Ok(());
        }
        let value = generate_password(&p).map_err(|e| {
            ProviderError::invalid(format!("{}: {}", resource.id(), e.message))
        })?;
        payload_mut::<RandomPassword>(resource)?.value = value;
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>, _force: bool) -> Result<(), ProviderError> {
        payload_mut::<RandomPassword>(resource)?.value.clear();
        Ok(())
    }

    fn lookup(&self, _resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
pub struct RandomUuidProvider;

impl Provider for RandomUuidProvider {
    fn kind(&self) -> &'static str {
        "random_uuid"
    }

    fn create(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let out = payload_mut::<RandomUuid>(resource)?;
        if out.value.is_empty() {
            out.value = uuid::Uuid::new_v4().to_string();
        }
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>, _force: bool) -> Result<(), ProviderError> {
        payload_mut::<RandomUuid>(resource)?.value.clear();
        Ok(())
    }

    fn lookup(&self, _resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
pub struct RandomCreatureProvider;

impl Provider for RandomCreatureProvider {
    fn kind(&self) -> &'static str {
        "random_creature"
    }

    fn create(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let out = payload_mut::<RandomCreature>(resource)?;
        if out.value.is_empty() {
            let creature = CREATURES.choose(&mut rand::thread_rng()).copied().unwrap_or("yeti");
            out.value = creature.to_owned();
        }
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>, _force: bool) -> Result<(), ProviderError> {
        payload_mut::<RandomCreature>(resource)?.value.clear();
        Ok(())
    }

    fn lookup(&self, _resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}
