// orderly/examples/basic_forwarding.rs

use async_trait::async_trait;
use orderly::{
  Forwarder, MemoryKeyValueStore, MemoryOrderStore, Order, OrderBusiness, OrderStatus, OrderType, OrderlyConfig,
  OrderlyError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const GIFT_CARD: OrderType = OrderType(10);

// --- The business: issue a gift card once the order is paid ---
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GiftCard {
  face_value: u32,
  card_number: Option<String>,
}

struct GiftCardBusiness;

#[async_trait]
impl OrderBusiness for GiftCardBusiness {
  type Extension = GiftCard;

  fn new_extension(&self) -> Option<GiftCard> {
    Some(GiftCard::default())
  }

  async fn can_forward(&self, order: &Order, card: Option<&mut GiftCard>) -> anyhow::Result<Option<String>> {
    let face_value = card.map(|c| c.face_value).unwrap_or_default();
    if face_value == 0 || face_value > 500 {
      return Ok(Some(format!("face value {} out of range", face_value)));
    }
    info!(order_id = %order.order_id, face_value, "Gift card order accepted.");
    Ok(None)
  }

  async fn deliver(&self, order: &Order, card: Option<&mut GiftCard>) -> anyhow::Result<()> {
    let card = card.ok_or_else(|| anyhow::anyhow!("gift card order without card data"))?;
    card.card_number = Some(format!("GC-{}", order.order_id));
    info!(order_id = %order.order_id, card_number = ?card.card_number, "Gift card issued.");
    Ok(())
  }

  async fn on_abnormal(&self, order: &Order, _card: Option<&mut GiftCard>, status: OrderStatus) -> anyhow::Result<()> {
    warn!(order_id = %order.order_id, %status, "Gift card order did not go through.");
    Ok(())
  }

  async fn on_finish(&self, order: &Order, card: Option<&mut GiftCard>) -> anyhow::Result<()> {
    info!(order_id = %order.order_id, card = ?card, "Gift card order finished.");
    Ok(())
  }
}

#[tokio::main]
async fn main() -> Result<(), OrderlyError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
  info!("--- Orderly Basic Forwarding Example ---");

  // 1. A forwarder over in-memory stores. Compensation stays off here.
  let forwarder = Forwarder::builder(OrderlyConfig::default())
    .order_store(Arc::new(MemoryOrderStore::new()))
    .kv_store(Arc::new(MemoryKeyValueStore::new()))
    .build()?;

  // 2. One business per order type, registered at startup.
  forwarder.register_business(GIFT_CARD, Arc::new(GiftCardBusiness))?;

  // 3. Create and forward an order in one go.
  let order_id = forwarder.gen_oid(GIFT_CARD, "alice").await?;
  let order = Order::new(order_id.clone(), GIFT_CARD, "alice");
  let card = GiftCard {
    face_value: 50,
    card_number: None,
  };
  forwarder.create_order(&order, Some(&card), false).await?;
  let outcome = forwarder.forward(order, Some(card)).await?;
  info!(?outcome, "First order forwarded.");

  let (_, extension, status) = forwarder.get_order(&order_id, "alice").await?;
  info!(%status, %extension, "Stored state after forwarding.");

  // 4. Forwarding it again only re-signals the finish.
  let again = forwarder.forward_by_id(&order_id, "alice").await?;
  info!(status = ?again.status(), "Second forward of the same order.");

  // 5. An order the business refuses.
  let big_id = forwarder.gen_oid_by_user_oid(GIFT_CARD, "bob", "cart-9");
  let big = Order::new(big_id.clone(), GIFT_CARD, "bob");
  forwarder
    .create_order(
      &big,
      Some(&GiftCard {
        face_value: 10_000,
        card_number: None,
      }),
      false,
    )
    .await?;
  let refused = forwarder.forward_by_id(&big_id, "bob").await?;
  info!(cancelled = refused.is_cancelled(), ?refused, "Oversized order.");

  Ok(())
}
