/*
 * Layering of key/value maps. Used to assemble the resolved profile's
 * top-level fields, where manifest-derived identity is laid over values that
 * came from the profile document itself.
 */
use std::collections::BTreeMap;

/*
 * Returns the union of `old` and `new`. A key present in both takes the value
 * from `new`; keys present on one side only keep that side's value. Neither
 * input is modified.
 */
pub fn merge_maps<K, V>(old: &BTreeMap<K, V>, new: &BTreeMap<K, V>) -> BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    let mut merged: BTreeMap<K, V> = old
        .iter()
        .filter(|(key, _)| !new.contains_key(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    merged.extend(new.iter().map(|(key, value)| (key.clone(), value.clone())));
    merged
}
