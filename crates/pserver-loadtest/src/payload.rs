//! Synthetic pserver records
//!
//! Every record is a pure function of its seed: string fields interpolate the
//! seed into `example-<field>-val-<seed>`, numeric fields carry the seed as-is
//! and `in-maint` is always `true`.

use std::ops::RangeInclusive;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default seed range drawn by the workloads
pub const DEFAULT_SEED_RANGE: RangeInclusive<u64> = 10_000..=1_000_000;

/// Pserver payload as accepted by `PUT /cloud-infrastructure/pservers/pserver/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PServerRecord {
    pub hostname: u64,
    pub ptnii_equip_name: String,
    pub number_of_cpus: u64,
    pub disk_in_gigabytes: u64,
    pub ram_in_megabytes: u64,
    pub equip_type: String,
    pub equip_vendor: String,
    pub equip_model: String,
    pub fqdn: String,
    pub pserver_selflink: String,
    pub ipv4_oam_address: String,
    pub serial_number: String,
    pub ipaddress_v4_loopback_0: String,
    pub ipaddress_v6_loopback_0: String,
    pub ipaddress_v4_aim: String,
    pub ipaddress_v6_aim: String,
    pub ipaddress_v6_oam: String,
    pub inv_status: String,
    pub pserver_id: String,
    pub internet_topology: String,
    pub in_maint: bool,
    pub pserver_name2: String,
    pub purpose: String,
    pub prov_status: String,
    pub management_option: String,
    pub host_profile: String,
}

fn field(name: &str, seed: u64) -> String {
    format!("example-{}-val-{}", name, seed)
}

/// Build the record for `seed`
pub fn generate(seed: u64) -> PServerRecord {
    PServerRecord {
        hostname: seed,
        ptnii_equip_name: field("ptnii-equip-name", seed),
        number_of_cpus: seed,
        disk_in_gigabytes: seed,
        ram_in_megabytes: seed,
        equip_type: field("equip-type", seed),
        equip_vendor: field("equip-vendor", seed),
        equip_model: field("equip-model", seed),
        fqdn: field("fqdn", seed),
        pserver_selflink: field("pserver-selflink", seed),
        ipv4_oam_address: field("ipv4-oam-address", seed),
        serial_number: field("serial-number", seed),
        // the loopback values drop the dash before the index
        ipaddress_v4_loopback_0: field("ipaddress-v4-loopback0", seed),
        ipaddress_v6_loopback_0: field("ipaddress-v6-loopback0", seed),
        ipaddress_v4_aim: field("ipaddress-v4-aim", seed),
        ipaddress_v6_aim: field("ipaddress-v6-aim", seed),
        ipaddress_v6_oam: field("ipaddress-v6-oam", seed),
        inv_status: field("inv-status", seed),
        pserver_id: field("pserver-id", seed),
        internet_topology: field("internet-topology", seed),
        in_maint: true,
        pserver_name2: field("pserver-name2", seed),
        purpose: field("purpose", seed),
        prov_status: field("prov-status", seed),
        management_option: field("management-option", seed),
        host_profile: field("host-profile", seed),
    }
}

impl PServerRecord {
    /// Encode as the JSON request body
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Source of record seeds, the `randomInt(min, max)` capability
pub trait SeedSource: Send + Sync {
    /// Uniform integer in `range`, both ends inclusive
    fn random_int(&self, range: &RangeInclusive<u64>) -> u64;
}

/// Thread-local RNG backed seeds
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSeeds;

impl SeedSource for RandomSeeds {
    fn random_int(&self, range: &RangeInclusive<u64>) -> u64 {
        rand::thread_rng().gen_range(range.clone())
    }
}

/// Always yields the same seed, clamped into the requested range
#[derive(Debug, Clone, Copy)]
pub struct FixedSeed(pub u64);

impl SeedSource for FixedSeed {
    fn random_int(&self, range: &RangeInclusive<u64>) -> u64 {
        self.0.clamp(*range.start(), *range.end())
    }
}
