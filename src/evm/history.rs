use super::ContextError;
use crate::chain::{ChainView, ConsensusEngine};
use crate::types::{BlockHeader, Bytes, B256};
use ahash::AHashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use tracing::{debug, trace};

/// Resolves hashes and nonces of ancestors of a reference header.
///
/// Lookups walk backward from the reference's parent through the consensus
/// engine and memoize every block they pass. The memo tables belong to one
/// execution context; the resolver is `!Send` so it stays on the thread that
/// built it.
pub struct HistoryResolver<'a, C: ChainView + ?Sized> {
    reference: &'a BlockHeader,
    chain: &'a C,
    hashes: AHashMap<u64, B256>,
    nonces: AHashMap<u64, Bytes>,
    /// Highest number the walk failed to reach. Nothing at or below it
    /// resolves, so misses there skip the walk.
    unreachable: Option<u64>,
    _not_send: PhantomData<Rc<()>>,
}

impl<'a, C: ChainView + ?Sized> HistoryResolver<'a, C> {
    pub fn new(reference: &'a BlockHeader, chain: &'a C) -> Result<Self, ContextError> {
        let parent_number = reference
            .number()
            .checked_sub(1)
            .ok_or(ContextError::GenesisHeader)?;

        let mut hashes = AHashMap::new();
        hashes.insert(parent_number, reference.parent_hash());

        Ok(Self {
            reference,
            chain,
            hashes,
            nonces: AHashMap::new(),
            unreachable: None,
            _not_send: PhantomData,
        })
    }

    pub fn reference(&self) -> &BlockHeader {
        self.reference
    }

    /// Hash of ancestor `number`, or the zero hash if the walk runs out of
    /// blocks before reaching it.
    pub fn resolve_hash(&mut self, number: u64) -> Result<B256, ContextError> {
        self.check_ancestor(number)?;
        if let Some(hash) = self.hashes.get(&number) {
            return Ok(*hash);
        }
        if self.is_unreachable(number) {
            return Ok(B256::ZERO);
        }

        self.walk(|resolver| resolver.hashes.contains_key(&number));
        Ok(self.hashes.get(&number).copied().unwrap_or(B256::ZERO))
    }

    /// Nonce of ancestor `number`, or `None` if the walk runs out of blocks
    /// before reaching it.
    pub fn resolve_nonce(&mut self, number: u64) -> Result<Option<Bytes>, ContextError> {
        self.check_ancestor(number)?;
        if let Some(nonce) = self.nonces.get(&number) {
            return Ok(Some(nonce.clone()));
        }
        if self.is_unreachable(number) {
            return Ok(None);
        }

        self.walk(|resolver| resolver.nonces.contains_key(&number));
        Ok(self.nonces.get(&number).cloned())
    }

    fn check_ancestor(&self, number: u64) -> Result<(), ContextError> {
        if number >= self.reference.number() {
            return Err(ContextError::FutureBlock {
                requested: number,
                reference: self.reference.number(),
            });
        }
        Ok(())
    }

    fn is_unreachable(&self, number: u64) -> bool {
        self.unreachable.is_some_and(|end| number <= end)
    }

    /// Walks from the reference's parent toward genesis until `done` holds or
    /// the engine has no more blocks. Entries are idempotent, so repeated
    /// walks only overwrite with equal values.
    fn walk(&mut self, done: impl Fn(&Self) -> bool) {
        let chain = self.chain;
        let engine = chain.engine();
        let mut hash = self.reference.parent_hash();
        let mut number = self.reference.number() - 1;
        let mut visited = 0usize;

        loop {
            let Some(block) = engine.block_by_hash_and_number(hash, number) else {
                debug!(
                    reference = self.reference.number(),
                    number,
                    visited,
                    "ancestor walk ran out of blocks"
                );
                self.unreachable = Some(number);
                return;
            };
            visited += 1;

            let header = &block.header;
            self.hashes.insert(number, hash);
            self.nonces.insert(number, header.nonce().clone());
            let parent_number = number.checked_sub(1);
            if let Some(parent_number) = parent_number {
                self.hashes.insert(parent_number, header.parent_hash());
            }

            if done(self) {
                trace!(
                    reference = self.reference.number(),
                    number,
                    visited,
                    "ancestor resolved"
                );
                return;
            }

            match parent_number {
                Some(parent_number) => {
                    hash = header.parent_hash();
                    number = parent_number;
                }
                None => return,
            }
        }
    }
}

impl<C: ChainView + ?Sized> fmt::Debug for HistoryResolver<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryResolver")
            .field("reference", &self.reference.number())
            .field("hashes", &self.hashes.len())
            .field("nonces", &self.nonces.len())
            .field("unreachable", &self.unreachable)
            .finish()
    }
}
