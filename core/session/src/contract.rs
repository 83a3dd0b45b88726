//! Typed client of the BalanceValidator contract.
use crate::conf::ContractRegistry;
use crate::decryption::{DecryptedResult, ResultType};
use crate::error::{SessionError, SessionResult};
use crate::handle::Handle;
use crate::lifecycle::SessionLifecycle;
use crate::signer::SigningProvider;
use crate::solidity_types::IBalanceValidator;
use alloy_primitives::{Address, Bytes, B256};
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

/// Access to contracts of the active chain.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContractTransport: Send + Sync {
    /// Submit a transaction from `from` and wait until it is included.
    /// Returns the transaction hash.
    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        calldata: Bytes,
    ) -> anyhow::Result<B256>;

    /// Evaluate a call without committing it and return the raw return data.
    async fn call(&self, from: Address, to: Address, calldata: Bytes) -> anyhow::Result<Bytes>;
}

pub struct BalanceValidatorClient {
    session: Arc<SessionLifecycle>,
    transport: Arc<dyn ContractTransport>,
    signer: Arc<dyn SigningProvider>,
    registry: ContractRegistry,
}

impl BalanceValidatorClient {
    pub fn new(
        session: Arc<SessionLifecycle>,
        transport: Arc<dyn ContractTransport>,
        signer: Arc<dyn SigningProvider>,
        registry: ContractRegistry,
    ) -> Self {
        Self {
            session,
            transport,
            signer,
            registry,
        }
    }

    /// Address of the contract on the active chain.
    pub async fn contract_address(&self) -> SessionResult<Address> {
        let chain_id = self
            .session
            .active_chain_id()
            .await
            .ok_or(SessionError::NoActiveNetwork)?;
        if !self.registry.is_deployed(chain_id) {
            return Err(SessionError::ContractNotDeployed { chain_id }.logged());
        }
        Ok(self.registry.balance_validator_address(chain_id))
    }

    async fn send(&self, to: Address, calldata: Vec<u8>) -> SessionResult<B256> {
        let tx = self
            .transport
            .send_transaction(self.signer.address(), to, calldata.into())
            .await
            .map_err(|e| SessionError::ContractCall(e.to_string()).logged())?;
        tracing::info!("Transaction {tx} included");
        Ok(tx)
    }

    async fn call(&self, to: Address, calldata: Vec<u8>) -> SessionResult<Bytes> {
        self.transport
            .call(self.signer.address(), to, calldata.into())
            .await
            .map_err(|e| SessionError::ContractCall(e.to_string()).logged())
    }

    pub async fn has_balance(&self) -> SessionResult<bool> {
        let contract = self.contract_address().await?;
        let calldata = IBalanceValidator::hasBalanceCall {
            user: self.signer.address(),
        }
        .abi_encode();
        let ret = self.call(contract, calldata).await?;
        <bool as SolValue>::abi_decode(&ret)
            .map_err(|e| SessionError::ContractCall(format!("cannot decode hasBalance: {e}")))
    }

    pub async fn set_balance(&self, balance: u32) -> SessionResult<B256> {
        let contract = self.contract_address().await?;
        let input = self
            .session
            .encrypt(contract, self.signer.address(), balance)
            .await?;
        let handle = input.first_handle()?;
        let calldata = IBalanceValidator::setBalanceCall {
            encryptedBalance: handle,
            inputProof: input.input_proof.into(),
        }
        .abi_encode();
        self.send(contract, calldata).await
    }

    /// Overwrite the balance with an encrypted zero.
    pub async fn clear_balance(&self) -> SessionResult<B256> {
        let contract = self.contract_address().await?;
        let input = self.session.encrypt(contract, self.signer.address(), 0).await?;
        let handle = input.first_handle()?;
        let calldata = IBalanceValidator::clearBalanceCall {
            encryptedZero: handle,
            inputProof: input.input_proof.into(),
        }
        .abi_encode();
        self.send(contract, calldata).await
    }

    /// Check privately whether the balance covers `amount`.
    ///
    /// The transaction is submitted, then the same call is evaluated to read the
    /// encrypted boolean it returns, which is finally decrypted for the user.
    pub async fn validate_transfer(&self, amount: u32) -> SessionResult<bool> {
        let contract = self.contract_address().await?;
        let input = self
            .session
            .encrypt(contract, self.signer.address(), amount)
            .await?;
        let handle = input.first_handle()?;
        let calldata = IBalanceValidator::validateTransferCall {
            encryptedAmount: handle,
            inputProof: input.input_proof.into(),
        }
        .abi_encode();
        self.send(contract, calldata.clone()).await?;
        let ret = self.call(contract, calldata).await?;
        let result_handle = <B256 as SolValue>::abi_decode(&ret).map_err(|e| {
            SessionError::ContractCall(format!("cannot decode validateTransfer: {e}"))
        })?;
        let outcome = self
            .session
            .decrypt(
                result_handle,
                contract,
                ResultType::Ebool,
                Arc::clone(&self.signer),
            )
            .await?;
        match outcome.result {
            DecryptedResult::Boolean(b) => Ok(b),
            DecryptedResult::Integer(_) => Err(SessionError::DecryptTransportFailed {
                reason: "expected a boolean result".to_string(),
            }),
        }
    }

    /// Handle of the user's encrypted balance.
    pub async fn encrypted_balance(&self) -> SessionResult<Handle> {
        let contract = self.contract_address().await?;
        let calldata = IBalanceValidator::getEncryptedBalanceCall {
            user: self.signer.address(),
        }
        .abi_encode();
        let ret = self.call(contract, calldata).await?;
        <B256 as SolValue>::abi_decode(&ret).map_err(|e| {
            SessionError::ContractCall(format!("cannot decode getEncryptedBalance: {e}"))
        })
    }

    pub async fn decrypt_balance(&self) -> SessionResult<u32> {
        let contract = self.contract_address().await?;
        let handle = self.encrypted_balance().await?;
        let outcome = self
            .session
            .decrypt(handle, contract, ResultType::Euint32, Arc::clone(&self.signer))
            .await?;
        match outcome.result {
            DecryptedResult::Integer(v) => Ok(v),
            DecryptedResult::Boolean(_) => Err(SessionError::DecryptTransportFailed {
                reason: "expected an integer result".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::SessionConfig;
    use crate::consts::{LOCAL_BALANCE_VALIDATOR_ADDRESS, LOCAL_CHAIN_ID, REMOTE_CHAIN_ID};
    use crate::engine::DefaultEngineFactory;
    use crate::signer::LocalWalletSigner;

    fn client(transport: MockContractTransport) -> (Arc<SessionLifecycle>, BalanceValidatorClient) {
        let conf = SessionConfig::default();
        let session = Arc::new(SessionLifecycle::new(
            &conf,
            Arc::new(DefaultEngineFactory::new(&conf)),
        ));
        let client = BalanceValidatorClient::new(
            Arc::clone(&session),
            Arc::new(transport),
            Arc::new(LocalWalletSigner::random()),
            conf.contracts,
        );
        (session, client)
    }

    #[tokio::test]
    async fn test_not_deployed() {
        let (session, client) = client(MockContractTransport::new());
        assert!(matches!(
            client.contract_address().await,
            Err(SessionError::NoActiveNetwork)
        ));
        session.on_network_changed(REMOTE_CHAIN_ID).await;
        assert!(matches!(
            client.has_balance().await,
            Err(SessionError::ContractNotDeployed { chain_id }) if chain_id == REMOTE_CHAIN_ID
        ));
    }

    #[tokio::test]
    async fn test_has_balance_decodes_return() {
        let mut transport = MockContractTransport::new();
        transport
            .expect_call()
            .withf(|_, to, data| {
                *to == LOCAL_BALANCE_VALIDATOR_ADDRESS
                    && data.starts_with(&IBalanceValidator::hasBalanceCall::SELECTOR)
            })
            .times(1)
            .returning(|_, _, _| Ok(true.abi_encode().into()));
        let (session, client) = client(transport);
        session.on_network_changed(LOCAL_CHAIN_ID).await;
        assert!(client.has_balance().await.unwrap());
    }

    #[tokio::test]
    async fn test_transport_errors_are_contract_call_errors() {
        let mut transport = MockContractTransport::new();
        transport
            .expect_call()
            .returning(|_, _, _| Err(anyhow::anyhow!("execution reverted")));
        let (session, client) = client(transport);
        session.on_network_changed(LOCAL_CHAIN_ID).await;
        let err = client.encrypted_balance().await.unwrap_err();
        assert!(matches!(err, SessionError::ContractCall(msg) if msg.contains("reverted")));
    }
}
