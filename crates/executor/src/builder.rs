//! Bundle builder: dependency ordering, self-conflict checks, tip sizing

use std::collections::BTreeSet;
use std::sync::Arc;

use alloy_primitives::Bytes;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use searcher_core::{
    tip_transfer, AccountId, Bundle, BundleTransaction, BuildResult, ExecutionIdentity, Instruction,
    PipelineConfig, ProposedInstruction, ScoredOpportunity, Slot, TipPolicy, UnbuildableReason,
};

/// Turns a transaction's instructions into the payload sent to the relay
pub trait TransactionSigner: Send + Sync {
    fn sign(&self, payer: &AccountId, instructions: &[Instruction]) -> Result<Bytes, String>;
}

/// Deterministic unsigned encoding, used for dry runs and tests.
///
/// Layout: `payer [32] | n u8 | { program [32] | m u8 | { key [32] | flags u8 } | len u16 | data }`
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsignedEncoder;

impl TransactionSigner for UnsignedEncoder {
    fn sign(&self, payer: &AccountId, instructions: &[Instruction]) -> Result<Bytes, String> {
        let count = u8::try_from(instructions.len()).map_err(|_| "too many instructions".to_string())?;
        let mut out = Vec::with_capacity(64 + instructions.len() * 128);
        out.extend_from_slice(payer.as_slice());
        out.push(count);
        for ix in instructions {
            out.extend_from_slice(ix.program_id.as_slice());
            out.push(u8::try_from(ix.accounts.len()).map_err(|_| "too many accounts".to_string())?);
            for meta in &ix.accounts {
                out.extend_from_slice(meta.pubkey.as_slice());
                out.push(u8::from(meta.is_writable) | u8::from(meta.is_signer) << 1);
            }
            let len = u16::try_from(ix.data.len()).map_err(|_| "instruction data too long".to_string())?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&ix.data);
        }
        Ok(Bytes::from(out))
    }
}

/// Assembles admitted opportunities into relay-ready bundles
pub struct BundleBuilder {
    max_bundle_size: usize,
    staleness_tolerance: Slot,
    tip_policy: TipPolicy,
    identity: ExecutionIdentity,
    signer: Arc<dyn TransactionSigner>,
}

impl BundleBuilder {
    pub fn new(config: &PipelineConfig, identity: ExecutionIdentity) -> Self {
        Self {
            max_bundle_size: config.max_bundle_size,
            staleness_tolerance: config.staleness_tolerance_slots,
            tip_policy: config.tip_policy(),
            identity,
            signer: Arc::new(UnsignedEncoder),
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn TransactionSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// Build a bundle targeting the slot after `current_slot`.
    ///
    /// One transaction per instruction in dependency order, then the tip
    /// transaction. The tip is sized from profit before tip and capped by
    /// the policy's maximum fraction.
    pub fn build(&self, scored: &ScoredOpportunity, current_slot: Slot) -> BuildResult<Bundle> {
        let opp = scored.opportunity();
        let proposed = &opp.instructions;
        if proposed.is_empty() {
            return Err(UnbuildableReason::Empty.into());
        }

        let required = proposed.len() + 1;
        if required > self.max_bundle_size {
            return Err(UnbuildableReason::TooManyTransactions {
                required,
                max: self.max_bundle_size,
            }
            .into());
        }

        let order = dependency_order(proposed)?;
        check_conflicts(proposed)?;

        let gross = scored.expected_profit() + scored.tip();
        let tip = self.tip_policy.tip_for(gross).ok_or(UnbuildableReason::TipBelowMinimum {
            cap: self.tip_policy.cap(gross),
            min: self.tip_policy.min_lamports,
        })?;

        let mut transactions = Vec::with_capacity(required);
        for index in order {
            transactions.push(self.transaction(vec![proposed[index].instruction.clone()])?);
        }
        transactions.push(self.transaction(vec![tip_transfer(
            self.identity.payer,
            self.identity.tip_account,
            tip,
        )])?);

        let tip_value = Decimal::from(tip);
        let bundle = Bundle {
            id: Uuid::new_v4(),
            opportunity_id: opp.id.clone(),
            detector: opp.detector,
            dedup_key: opp.dedup_key.clone(),
            source_slot: opp.slot,
            target_slot: current_slot + 1,
            expiry_slot: opp.slot + self.staleness_tolerance,
            tip_lamports: tip,
            transactions,
            assumptions: opp.assumptions.clone(),
            expected_profit: gross - tip_value,
            capital_required: scored.capital_required() - scored.tip() + tip_value,
            built_at: Utc::now(),
            breaker_probe: None,
        };

        debug!(
            bundle = %bundle.id,
            opportunity = %opp.id,
            transactions = bundle.len(),
            tip = bundle.tip_lamports,
            "bundle built"
        );
        Ok(bundle)
    }

    fn transaction(&self, instructions: Vec<Instruction>) -> BuildResult<BundleTransaction> {
        let payload = self
            .signer
            .sign(&self.identity.payer, &instructions)
            .map_err(UnbuildableReason::Signing)?;
        Ok(BundleTransaction { instructions, payload })
    }
}

/// Stable topological order: among ready instructions the lowest index goes
/// first, so an already-ordered list comes back unchanged.
fn dependency_order(proposed: &[ProposedInstruction]) -> Result<Vec<usize>, UnbuildableReason> {
    let n = proposed.len();
    let mut pending = vec![0usize; n];
    let mut followers = vec![Vec::new(); n];

    for (index, p) in proposed.iter().enumerate() {
        let mut seen = BTreeSet::new();
        for &dep in &p.depends_on {
            if dep >= n {
                return Err(UnbuildableReason::MissingDependency { index, missing: dep });
            }
            if dep == index {
                return Err(UnbuildableReason::DependencyCycle);
            }
            if seen.insert(dep) {
                pending[index] += 1;
                followers[dep].push(index);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|i| pending[*i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &follower in &followers[next] {
            pending[follower] -= 1;
            if pending[follower] == 0 {
                ready.insert(follower);
            }
        }
    }

    if order.len() != n {
        return Err(UnbuildableReason::DependencyCycle);
    }
    Ok(order)
}

/// Two instructions writing the same non-signer account must be ordered,
/// directly or transitively. Signers are the fee payer, writable everywhere.
fn check_conflicts(proposed: &[ProposedInstruction]) -> Result<(), UnbuildableReason> {
    let n = proposed.len();

    // reach[i][j]: i runs after j
    let mut reach = vec![vec![false; n]; n];
    for (i, p) in proposed.iter().enumerate() {
        for &dep in &p.depends_on {
            reach[i][dep] = true;
        }
    }
    for k in 0..n {
        for i in 0..n {
            if reach[i][k] {
                for j in 0..n {
                    if reach[k][j] {
                        reach[i][j] = true;
                    }
                }
            }
        }
    }

    let contended = |ix: &Instruction| -> Vec<AccountId> {
        ix.accounts
            .iter()
            .filter(|m| m.is_writable && !m.is_signer)
            .map(|m| m.pubkey)
            .collect()
    };
    let writes: Vec<Vec<AccountId>> = proposed.iter().map(|p| contended(&p.instruction)).collect();

    for first in 0..n {
        for second in (first + 1)..n {
            if reach[first][second] || reach[second][first] {
                continue;
            }
            if let Some(account) = writes[first].iter().find(|a| writes[second].contains(a)) {
                return Err(UnbuildableReason::ConflictingWrites {
                    first,
                    second,
                    account: *account,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{opportunity, scored_opportunity, writes, MARKET};
    use searcher_core::{AccountMeta, BuildError, ProgramId};

    const TIP_ACCOUNT: AccountId = AccountId::repeat_byte(0x7b);
    const PAYER: AccountId = AccountId::repeat_byte(0xfe);

    fn identity() -> ExecutionIdentity {
        ExecutionIdentity {
            payer: PAYER,
            token_accounts: Default::default(),
            token_program: ProgramId::repeat_byte(0x70),
            associated_token_program: ProgramId::repeat_byte(0x71),
            tip_account: TIP_ACCOUNT,
        }
    }

    fn builder() -> BundleBuilder {
        BundleBuilder::new(&PipelineConfig::default(), identity())
    }

    fn account(b: u8) -> AccountId {
        AccountId::repeat_byte(b)
    }

    fn unbuildable(result: BuildResult<Bundle>) -> UnbuildableReason {
        match result {
            Err(BuildError::Unbuildable(reason)) => reason,
            Ok(_) => panic!("expected unbuildable"),
        }
    }

    #[test]
    fn test_orders_by_dependency() {
        // 0 depends on 2, 1 depends on 0
        let opp = opportunity(
            vec![
                ProposedInstruction::new(writes(0, &[account(1)])).after(2),
                ProposedInstruction::new(writes(1, &[account(1)])).after(0),
                ProposedInstruction::new(writes(2, &[account(1)])),
            ],
            100,
        );
        let bundle = builder()
            .build(&scored_opportunity(opp, 1_000_000, 1_200_000, 0), 101)
            .unwrap();

        let tags: Vec<u8> = bundle.transactions[..3]
            .iter()
            .map(|tx| tx.instructions[0].data[0])
            .collect();
        assert_eq!(tags, vec![2, 0, 1]);
        assert_eq!(bundle.len(), 4);
        assert_eq!(bundle.source_slot, 100);
        assert_eq!(bundle.target_slot, 102);
        assert_eq!(bundle.expiry_slot, 105);
    }

    #[test]
    fn test_tip_is_last_and_bounded() {
        let opp = opportunity(vec![ProposedInstruction::new(writes(0, &[MARKET]))], 100);
        let scored = scored_opportunity(opp, 1_000_000, 1_210_000, 0);
        let bundle = builder().build(&scored, 100).unwrap();

        // Profit 200_000 before tip, half offered
        assert_eq!(bundle.tip_lamports, 100_000);
        assert_eq!(bundle.expected_profit, Decimal::from(100_000));
        let tip_ix = &bundle.transactions.last().unwrap().instructions[0];
        assert!(tip_ix.writes(&TIP_ACCOUNT));
        assert_eq!(&tip_ix.data[4..], &100_000u64.to_le_bytes());
    }

    #[test]
    fn test_tip_below_minimum() {
        let opp = opportunity(vec![ProposedInstruction::new(writes(0, &[MARKET]))], 100);
        // 1_000 before tip: the 80% cap is under the 1_000 minimum
        let scored = scored_opportunity(opp, 1_000_000, 1_011_000, 0);
        assert_eq!(
            unbuildable(builder().build(&scored, 100)),
            UnbuildableReason::TipBelowMinimum { cap: 800, min: 1_000 }
        );
    }

    #[test]
    fn test_too_many_transactions() {
        let instructions = (0..5)
            .map(|i| ProposedInstruction::new(writes(i, &[account(i + 1)])))
            .collect();
        let opp = opportunity(instructions, 100);
        assert_eq!(
            unbuildable(builder().build(&scored_opportunity(opp, 1_000_000, 1_200_000, 0), 100)),
            UnbuildableReason::TooManyTransactions { required: 6, max: 5 }
        );
    }

    #[test]
    fn test_unordered_writes_conflict() {
        let opp = opportunity(
            vec![
                ProposedInstruction::new(writes(0, &[account(1), account(2)])),
                ProposedInstruction::new(writes(1, &[account(3)])),
                ProposedInstruction::new(writes(2, &[account(2)])),
            ],
            100,
        );
        assert_eq!(
            unbuildable(builder().build(&scored_opportunity(opp, 1_000_000, 1_200_000, 0), 100)),
            UnbuildableReason::ConflictingWrites {
                first: 0,
                second: 2,
                account: account(2)
            }
        );
    }

    #[test]
    fn test_transitive_order_resolves_conflict() {
        let opp = opportunity(
            vec![
                ProposedInstruction::new(writes(0, &[account(1)])),
                ProposedInstruction::new(writes(1, &[account(2)])).after(0),
                ProposedInstruction::new(writes(2, &[account(1)])).after(1),
            ],
            100,
        );
        assert!(builder()
            .build(&scored_opportunity(opp, 1_000_000, 1_200_000, 0), 100)
            .is_ok());
    }

    #[test]
    fn test_shared_signer_is_not_a_conflict() {
        let signed = |tag: u8, target: AccountId| {
            Instruction::new(
                ProgramId::ZERO,
                vec![AccountMeta::signer(PAYER), AccountMeta::writable(target)],
                vec![tag],
            )
        };
        let opp = opportunity(
            vec![
                ProposedInstruction::new(signed(0, account(1))),
                ProposedInstruction::new(signed(1, account(2))),
            ],
            100,
        );
        assert!(builder()
            .build(&scored_opportunity(opp, 1_000_000, 1_200_000, 0), 100)
            .is_ok());
    }

    #[test]
    fn test_bad_dependencies() {
        let missing = opportunity(vec![ProposedInstruction::new(writes(0, &[MARKET])).after(3)], 100);
        assert_eq!(
            unbuildable(builder().build(&scored_opportunity(missing, 1_000_000, 1_200_000, 0), 100)),
            UnbuildableReason::MissingDependency { index: 0, missing: 3 }
        );

        let cycle = opportunity(
            vec![
                ProposedInstruction::new(writes(0, &[account(1)])).after(1),
                ProposedInstruction::new(writes(1, &[account(2)])).after(0),
            ],
            100,
        );
        assert_eq!(
            unbuildable(builder().build(&scored_opportunity(cycle, 1_000_000, 1_200_000, 0), 100)),
            UnbuildableReason::DependencyCycle
        );
    }

    #[test]
    fn test_encoder_layout() {
        let ix = writes(7, &[account(1)]);
        let payload = UnsignedEncoder.sign(&PAYER, &[ix]).unwrap();

        assert_eq!(&payload[..32], PAYER.as_slice());
        assert_eq!(payload[32], 1);
        // program, one account meta, two-byte length, one data byte
        assert_eq!(payload.len(), 32 + 1 + 32 + 1 + 33 + 2 + 1);
        assert_eq!(payload[payload.len() - 1], 7);
    }
}
