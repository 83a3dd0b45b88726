//! A BalanceValidator deployment running against [MockCoprocessor], for the local
//! network without a node and for tests.
use crate::conf::LocalConfig;
use crate::contract::ContractTransport;
use crate::engine::coprocessor::MockCoprocessor;
use crate::handle::{FheTypeTag, Handle};
use crate::solidity_types::{input_verification_domain, IBalanceValidator};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{Eip712Domain, SolInterface, SolValue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct ContractState {
    balances: HashMap<Address, Handle>,
    // (sender, amount handle) -> encrypted comparison result
    validations: HashMap<(Address, Handle), Handle>,
}

pub struct SimulatedBalanceValidator {
    address: Address,
    chain_id: u64,
    input_domain: Eip712Domain,
    coprocessor: Arc<MockCoprocessor>,
    state: Mutex<ContractState>,
    nonce: AtomicU64,
}

impl SimulatedBalanceValidator {
    pub fn new(
        address: Address,
        chain_id: u64,
        conf: &LocalConfig,
        coprocessor: Arc<MockCoprocessor>,
    ) -> Self {
        Self {
            address,
            chain_id,
            input_domain: input_verification_domain(
                conf.gateway_chain_id,
                conf.verifying_contract_input_verification,
            ),
            coprocessor,
            state: Mutex::new(ContractState::default()),
            nonce: AtomicU64::new(0),
        }
    }

    /// Verify an external input and take ownership of it for `sender`.
    async fn import_input(
        &self,
        sender: Address,
        handle: Handle,
        proof: &[u8],
    ) -> anyhow::Result<()> {
        self.coprocessor.verify_input(
            &self.input_domain,
            &handle,
            proof,
            sender,
            self.address,
            self.chain_id,
        )?;
        if !self.coprocessor.is_allowed(&handle, &self.address).await {
            anyhow::bail!("contract is not allowed to use {handle}");
        }
        self.coprocessor.allow(&handle, sender).await
    }

    async fn store_balance(
        &self,
        sender: Address,
        handle: Handle,
        proof: &[u8],
    ) -> anyhow::Result<()> {
        self.import_input(sender, handle, proof).await?;
        self.state.lock().await.balances.insert(sender, handle);
        Ok(())
    }

    async fn validate(
        &self,
        sender: Address,
        amount: Handle,
        proof: &[u8],
    ) -> anyhow::Result<Handle> {
        if let Some(result) = self
            .state
            .lock()
            .await
            .validations
            .get(&(sender, amount))
            .copied()
        {
            return Ok(result);
        }
        let balance = self
            .state
            .lock()
            .await
            .balances
            .get(&sender)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("execution reverted: No balance set"))?;
        self.import_input(sender, amount, proof).await?;
        let (Some(balance), Some(amount_value)) = (
            self.coprocessor.plaintext(&balance).await,
            self.coprocessor.plaintext(&amount).await,
        ) else {
            anyhow::bail!("coprocessor lost a ciphertext");
        };
        let sufficient = if balance >= amount_value {
            U256::from(1u8)
        } else {
            U256::ZERO
        };
        let result = self
            .coprocessor
            .insert_computed(sufficient, FheTypeTag::Ebool, self.chain_id, &[self.address, sender])
            .await;
        self.state
            .lock()
            .await
            .validations
            .insert((sender, amount), result);
        Ok(result)
    }

    fn check_target(&self, to: Address) -> anyhow::Result<()> {
        if to != self.address {
            anyhow::bail!("no contract deployed at {to}");
        }
        Ok(())
    }
}

#[async_trait]
impl ContractTransport for SimulatedBalanceValidator {
    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        calldata: Bytes,
    ) -> anyhow::Result<B256> {
        self.check_target(to)?;
        match IBalanceValidator::IBalanceValidatorCalls::abi_decode(&calldata)? {
            IBalanceValidator::IBalanceValidatorCalls::setBalance(c) => {
                self.store_balance(from, c.encryptedBalance, &c.inputProof).await?;
                tracing::info!("BalanceSet(user: {from})");
            }
            IBalanceValidator::IBalanceValidatorCalls::clearBalance(c) => {
                self.store_balance(from, c.encryptedZero, &c.inputProof).await?;
                tracing::info!("BalanceCleared(user: {from})");
            }
            IBalanceValidator::IBalanceValidatorCalls::validateTransfer(c) => {
                self.validate(from, c.encryptedAmount, &c.inputProof).await?;
                tracing::info!("ValidationRequested(user: {from})");
            }
            IBalanceValidator::IBalanceValidatorCalls::hasBalance(_)
            | IBalanceValidator::IBalanceValidatorCalls::getEncryptedBalance(_) => {}
        }
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        Ok(keccak256([nonce.to_be_bytes().as_slice(), &calldata[..]].concat()))
    }

    async fn call(&self, from: Address, to: Address, calldata: Bytes) -> anyhow::Result<Bytes> {
        self.check_target(to)?;
        let ret = match IBalanceValidator::IBalanceValidatorCalls::abi_decode(&calldata)? {
            IBalanceValidator::IBalanceValidatorCalls::hasBalance(c) => self
                .state
                .lock()
                .await
                .balances
                .contains_key(&c.user)
                .abi_encode(),
            IBalanceValidator::IBalanceValidatorCalls::getEncryptedBalance(c) => self
                .state
                .lock()
                .await
                .balances
                .get(&c.user)
                .copied()
                .unwrap_or(B256::ZERO)
                .abi_encode(),
            IBalanceValidator::IBalanceValidatorCalls::validateTransfer(c) => self
                .validate(from, c.encryptedAmount, &c.inputProof)
                .await?
                .abi_encode(),
            IBalanceValidator::IBalanceValidatorCalls::setBalance(_)
            | IBalanceValidator::IBalanceValidatorCalls::clearBalance(_) => Vec::new(),
        };
        Ok(ret.into())
    }
}
