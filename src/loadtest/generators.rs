//! Registry of built-in load tests.
//!
//! Each [`TestKind`] maps to a closure that synthesizes `n` JSON-RPC calls
//! from a seeded RNG. The registry is built once and shared; lookups go
//! through the enum, never through function names.

use rand::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::loadtest::error::{FloodError, Result};
use crate::loadtest::plan::{self, Call, Durations, ExtraArgs, LoadTest, TestParameters};

/// Built-in load tests, one per JSON-RPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TestKind {
    EthBlockNumber,
    EthChainId,
    EthGetBalance,
    EthGetTransactionCount,
    EthGetCode,
    EthGetBlockByNumber,
}

impl TestKind {
    pub const ALL: [TestKind; 6] = [
        Self::EthBlockNumber,
        Self::EthChainId,
        Self::EthGetBalance,
        Self::EthGetTransactionCount,
        Self::EthGetCode,
        Self::EthGetBlockByNumber,
    ];

    /// The test name, which is also the JSON-RPC method.
    pub fn name(self) -> &'static str {
        match self {
            Self::EthBlockNumber => "eth_blockNumber",
            Self::EthChainId => "eth_chainId",
            Self::EthGetBalance => "eth_getBalance",
            Self::EthGetTransactionCount => "eth_getTransactionCount",
            Self::EthGetCode => "eth_getCode",
            Self::EthGetBlockByNumber => "eth_getBlockByNumber",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::EthBlockNumber => "latest block number, no parameters",
            Self::EthChainId => "chain id, no parameters",
            Self::EthGetBalance => "balance of random addresses at random blocks",
            Self::EthGetTransactionCount => "nonce of random addresses at random blocks",
            Self::EthGetCode => "code of random addresses at latest",
            Self::EthGetBlockByNumber => "random blocks without transaction bodies",
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TestKind {
    type Err = FloodError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| FloodError::UnknownTest {
                name: s.to_string(),
            })
    }
}

/// Network-level inputs to call generation.
#[derive(Debug, Clone)]
pub struct GeneratorContext {
    /// Upper bound (inclusive) for random block numbers.
    pub max_block: u64,
}

impl From<&TestParameters> for GeneratorContext {
    fn from(parameters: &TestParameters) -> Self {
        Self {
            max_block: parameters.max_block,
        }
    }
}

type GenerateParams = Box<dyn Fn(&mut StdRng, &GeneratorContext) -> Value + Send + Sync>;

/// Enum-keyed registry of call generators.
pub struct GeneratorRegistry {
    generators: BTreeMap<TestKind, GenerateParams>,
}

fn boxed<F>(generate: F) -> GenerateParams
where
    F: Fn(&mut StdRng, &GeneratorContext) -> Value + Send + Sync + 'static,
{
    Box::new(generate)
}

fn random_address(rng: &mut StdRng) -> String {
    let bytes: Vec<u8> = (0..20).map(|_| rng.random::<u8>()).collect();
    format!("0x{}", hex(&bytes))
}

fn random_block(rng: &mut StdRng, ctx: &GeneratorContext) -> String {
    format!("{:#x}", rng.random_range(0..=ctx.max_block))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        let mut generators: BTreeMap<TestKind, GenerateParams> = BTreeMap::new();
        generators.insert(TestKind::EthBlockNumber, boxed(|_, _| json!([])));
        generators.insert(TestKind::EthChainId, boxed(|_, _| json!([])));
        generators.insert(
            TestKind::EthGetBalance,
            boxed(|rng, ctx| {
                let address = random_address(rng);
                json!([address, random_block(rng, ctx)])
            }),
        );
        generators.insert(
            TestKind::EthGetTransactionCount,
            boxed(|rng, ctx| {
                let address = random_address(rng);
                json!([address, random_block(rng, ctx)])
            }),
        );
        generators.insert(
            TestKind::EthGetCode,
            boxed(|rng, _| json!([random_address(rng), "latest"])),
        );
        generators.insert(
            TestKind::EthGetBlockByNumber,
            boxed(|rng, ctx| json!([random_block(rng, ctx), false])),
        );
        Self { generators }
    }

    pub fn kinds(&self) -> impl Iterator<Item = TestKind> + '_ {
        self.generators.keys().copied()
    }

    pub fn contains(&self, test_name: &str) -> bool {
        test_name
            .parse::<TestKind>()
            .map(|kind| self.generators.contains_key(&kind))
            .unwrap_or(false)
    }

    /// Generate `n` calls with sequential ids starting at 1.
    pub fn generate_calls(
        &self,
        kind: TestKind,
        seed: u64,
        n: usize,
        ctx: &GeneratorContext,
    ) -> Result<Vec<Call>> {
        let generate = self
            .generators
            .get(&kind)
            .ok_or_else(|| FloodError::UnknownTest {
                name: kind.name().to_string(),
            })?;
        let mut rng = StdRng::seed_from_u64(seed);
        Ok((0..n)
            .map(|i| {
                json!({
                    "jsonrpc": "2.0",
                    "method": kind.name(),
                    "params": generate(&mut rng, ctx),
                    "id": i + 1,
                })
            })
            .collect())
    }

    /// Build a load test from its parameters.
    ///
    /// Everything generation depends on is read from `parameters`, so a saved
    /// plan regenerates the same calls on any host and under any config.
    pub fn generate_test(&self, parameters: TestParameters) -> Result<LoadTest> {
        let kind: TestKind = parameters.test_name.parse()?;
        let ctx = GeneratorContext::from(&parameters);
        let durations = Durations::PerRate(parameters.durations.clone());
        let extra_args = if parameters.extra_args.is_empty() {
            ExtraArgs::None
        } else {
            ExtraArgs::PerRate(parameters.extra_args.clone())
        };
        let n_calls = plan::estimate_call_count(&parameters.rates, &durations, None)?;
        let calls = self.generate_calls(kind, parameters.random_seed, n_calls as usize, &ctx)?;
        let attacks = plan::build(calls, &parameters.rates, &durations, &extra_args, false)?;
        Ok(LoadTest {
            parameters,
            attacks,
        })
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
