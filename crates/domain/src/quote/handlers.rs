//! Bus handlers for quote commands and queries.

use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, Clock};
use dispatch::{CommandBus, CommandHandler, DispatchError, QueryBus, QueryHandler};
use event_store::{EventEnvelope, EventQuery, EventStore, EventStoreExt};

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::repository::AggregateRepository;
use crate::specification::Specification;

use super::specifications::ForCustomer;
use super::{
    AddQuoteItem, ApproveQuote, CloneQuote, CreateQuote, ExpireQuote, ExtendQuoteValidity,
    FindQuotes, GetQuote, GetQuoteHistory, Quote, QuoteError, QuoteEvent, RejectQuote,
    RemoveQuoteItem, SubmitQuote, UpdateQuoteItem, UpdateQuoteTerms,
};

/// Handles every quote command and query against one event store.
///
/// Time-dependent rules read the injected clock, never the system time.
pub struct QuoteHandlers<S: EventStore> {
    repository: AggregateRepository<S, Quote>,
    clock: Arc<dyn Clock>,
}

impl<S: EventStore + Clone> Clone for QuoteHandlers<S> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: EventStore> QuoteHandlers<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository: AggregateRepository::new(store),
            clock,
        }
    }

    pub fn repository(&self) -> &AggregateRepository<S, Quote> {
        &self.repository
    }

    /// Runs a command method against an existing quote and saves what it raised.
    async fn mutate<F>(&self, quote_id: AggregateId, command: F) -> Result<(), DomainError>
    where
        F: FnOnce(&mut Quote) -> Result<(), QuoteError> + Send,
    {
        match self.repository.execute_with_snapshot(quote_id, command).await {
            Ok(result) => {
                tracing::debug!(%quote_id, version = %result.new_version, "quote updated");
                Ok(())
            }
            Err(DomainError::Quote(QuoteError::NotCreated)) => Err(DomainError::AggregateNotFound {
                aggregate_type: Quote::aggregate_type(),
                aggregate_id: quote_id,
            }),
            Err(e) => Err(e),
        }
    }

    /// Stores a freshly opened quote, refusing to reuse an existing id.
    async fn insert(&self, mut quote: Quote) -> Result<(), DomainError> {
        let quote_id = quote.id().ok_or(DomainError::MissingIdentity {
            aggregate_type: Quote::aggregate_type(),
        })?;
        if self.repository.store().aggregate_exists(quote_id).await? {
            return Err(QuoteError::AlreadyCreated.into());
        }
        self.repository.save_with_snapshot(&mut quote).await?;
        metrics::counter!("quotes_opened_total").increment(1);
        tracing::info!(%quote_id, quote_number = quote.quote_number(), "quote opened");
        Ok(())
    }
}

#[async_trait]
impl<S: EventStore + 'static> CommandHandler<CreateQuote> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, command: CreateQuote) -> Result<(), DomainError> {
        let quote = Quote::create(
            command.quote_id,
            command.customer_id,
            command.company_id,
            command.valid_until,
            command.terms,
            self.clock.now(),
        )?;
        self.insert(quote).await
    }
}

#[async_trait]
impl<S: EventStore + 'static> CommandHandler<AddQuoteItem> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, command: AddQuoteItem) -> Result<(), DomainError> {
        let now = self.clock.now();
        self.mutate(command.quote_id, move |quote| quote.add_item(command.item, now))
            .await
    }
}

#[async_trait]
impl<S: EventStore + 'static> CommandHandler<RemoveQuoteItem> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, command: RemoveQuoteItem) -> Result<(), DomainError> {
        let now = self.clock.now();
        self.mutate(command.quote_id, move |quote| {
            quote.remove_item(command.item_id, now)
        })
        .await
    }
}

#[async_trait]
impl<S: EventStore + 'static> CommandHandler<UpdateQuoteItem> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, command: UpdateQuoteItem) -> Result<(), DomainError> {
        let now = self.clock.now();
        self.mutate(command.quote_id, move |quote| {
            quote.update_item(command.item, now)
        })
        .await
    }
}

#[async_trait]
impl<S: EventStore + 'static> CommandHandler<SubmitQuote> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, command: SubmitQuote) -> Result<(), DomainError> {
        let now = self.clock.now();
        self.mutate(command.quote_id, move |quote| quote.submit(now))
            .await
    }
}

#[async_trait]
impl<S: EventStore + 'static> CommandHandler<ApproveQuote> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, command: ApproveQuote) -> Result<(), DomainError> {
        let now = self.clock.now();
        self.mutate(command.quote_id, move |quote| {
            quote.approve(command.approved_by, now)
        })
        .await
    }
}

#[async_trait]
impl<S: EventStore + 'static> CommandHandler<RejectQuote> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, command: RejectQuote) -> Result<(), DomainError> {
        let now = self.clock.now();
        self.mutate(command.quote_id, move |quote| quote.reject(command.reason, now))
            .await
    }
}

#[async_trait]
impl<S: EventStore + 'static> CommandHandler<ExpireQuote> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, command: ExpireQuote) -> Result<(), DomainError> {
        let now = self.clock.now();
        self.mutate(command.quote_id, move |quote| quote.expire(now))
            .await
    }
}

#[async_trait]
impl<S: EventStore + 'static> CommandHandler<UpdateQuoteTerms> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, command: UpdateQuoteTerms) -> Result<(), DomainError> {
        let now = self.clock.now();
        self.mutate(command.quote_id, move |quote| {
            quote.update_terms(command.terms, now)
        })
        .await
    }
}

#[async_trait]
impl<S: EventStore + 'static> CommandHandler<ExtendQuoteValidity> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, command: ExtendQuoteValidity) -> Result<(), DomainError> {
        let now = self.clock.now();
        self.mutate(command.quote_id, move |quote| {
            quote.extend_validity(command.valid_until, now)
        })
        .await
    }
}

#[async_trait]
impl<S: EventStore + 'static> CommandHandler<CloneQuote> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, command: CloneQuote) -> Result<(), DomainError> {
        let source = self.repository.get(command.source_id).await?;
        let copy = source.clone_as(command.new_quote_id, command.valid_until, self.clock.now())?;
        self.insert(copy).await
    }
}

#[async_trait]
impl<S: EventStore + 'static> QueryHandler<GetQuote> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, query: GetQuote) -> Result<Quote, DomainError> {
        self.repository.get(query.quote_id).await
    }
}

#[async_trait]
impl<S: EventStore + 'static> QueryHandler<GetQuoteHistory> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, query: GetQuoteHistory) -> Result<Vec<EventEnvelope>, DomainError> {
        let events = self.repository.store().get_all_events(query.quote_id).await?;
        if events.is_empty() {
            return Err(DomainError::AggregateNotFound {
                aggregate_type: Quote::aggregate_type(),
                aggregate_id: query.quote_id,
            });
        }
        Ok(events)
    }
}

#[async_trait]
impl<S: EventStore + 'static> QueryHandler<FindQuotes> for QuoteHandlers<S> {
    type Error = DomainError;

    async fn handle(&self, query: FindQuotes) -> Result<Vec<Quote>, DomainError> {
        let opened = self
            .repository
            .store()
            .query_events(
                EventQuery::new()
                    .aggregate_type(Quote::aggregate_type())
                    .event_types(QuoteEvent::OPENING_TYPES.map(String::from).to_vec()),
            )
            .await?;

        let rule = query.filter.specification(self.clock.now());
        let limit = query.limit.unwrap_or(usize::MAX);
        let mut found = Vec::new();
        for envelope in opened {
            if found.len() >= limit {
                break;
            }
            let quote = self.repository.load(envelope.aggregate_id).await?;
            let for_customer = query
                .customer_id
                .is_none_or(|customer| ForCustomer(customer).is_satisfied_by(&quote));
            if for_customer && rule.is_satisfied_by(&quote) {
                found.push(quote);
            }
        }

        tracing::debug!(filter = ?query.filter, matched = found.len(), "quotes found");
        Ok(found)
    }
}

/// Binds every quote command and query to a handler on the given buses.
pub async fn register_quote_handlers<S>(
    commands: &CommandBus,
    queries: &QueryBus,
    store: S,
    clock: Arc<dyn Clock>,
) -> Result<(), DispatchError>
where
    S: EventStore + Clone + 'static,
{
    let handlers = QuoteHandlers::new(store, clock);

    commands.register::<CreateQuote, _>(handlers.clone()).await?;
    commands.register::<AddQuoteItem, _>(handlers.clone()).await?;
    commands.register::<RemoveQuoteItem, _>(handlers.clone()).await?;
    commands.register::<UpdateQuoteItem, _>(handlers.clone()).await?;
    commands.register::<SubmitQuote, _>(handlers.clone()).await?;
    commands.register::<ApproveQuote, _>(handlers.clone()).await?;
    commands.register::<RejectQuote, _>(handlers.clone()).await?;
    commands.register::<ExpireQuote, _>(handlers.clone()).await?;
    commands.register::<UpdateQuoteTerms, _>(handlers.clone()).await?;
    commands.register::<ExtendQuoteValidity, _>(handlers.clone()).await?;
    commands.register::<CloneQuote, _>(handlers.clone()).await?;

    queries.register::<GetQuote, _>(handlers.clone()).await?;
    queries.register::<GetQuoteHistory, _>(handlers.clone()).await?;
    queries.register::<FindQuotes, _>(handlers).await?;

    tracing::info!("quote handlers registered");
    Ok(())
}
