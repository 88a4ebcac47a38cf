/// How the channel multiplier (virtual devices per physical device) is
/// derived at construction, grounded on `VirtualMultiArray::MemMult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemMode {
    /// Use `mem_mult[i]` verbatim when given, else
    /// [`config::mem::DEFAULT_CHANNEL_MULTIPLIER`] for every physical device.
    UseDefault,
    /// Use each physical device's reported VRAM size (whole GiB) as its
    /// multiplier, so array capacity distributes proportionally to VRAM.
    /// A `mem_mult[i] == 0` disables that device; a missing entry is
    /// treated as enabled (non-zero).
    UseVramRatios,
    /// PCIe-bandwidth-proportional distribution. Not implemented upstream;
    /// kept as a named, explicitly-rejected variant.
    UsePcieRatios,
}
