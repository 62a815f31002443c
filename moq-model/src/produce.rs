/// A producer/consumer pair returned when producing a model object.
pub struct Produce<P, C> {
	pub producer: P,
	pub consumer: C,
}
